use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use exhume_indexdat::IndexDat;
use exhume_indexdat::format::Layout;
use log::{debug, error};
use serde_json::{Value, json};

fn main() {
    let matches = Command::new("exhume_indexdat")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume the cache and history records from an Internet Explorer index.dat file.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the index.dat file or to the image containing it."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .requires("size")
                .help("The index.dat starts at address (decimal or hex). Defaults to 0."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .help("The size of the index.dat in bytes (decimal or hex). Defaults to the length of a raw file."),
        )
        .arg(
            Arg::new("bitmap_offset")
                .long("bitmap-offset")
                .value_parser(maybe_hex::<u64>)
                .help("Override the allocation bitmap location (decimal or hex)."),
        )
        .arg(
            Arg::new("header")
                .long("header")
                .action(ArgAction::SetTrue)
                .help("Display the index.dat header information."),
        )
        .arg(
            Arg::new("offsets")
                .long("offsets")
                .action(ArgAction::SetTrue)
                .help("List the offsets of the live records found in the hash table."),
        )
        .arg(
            Arg::new("records")
                .long("records")
                .action(ArgAction::SetTrue)
                .help("Decode and display every live record."),
        )
        .arg(
            Arg::new("pasco")
                .long("pasco")
                .action(ArgAction::SetTrue)
                .conflicts_with("json")
                .help("Print the live records as pasco2 style tab-separated lines."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output certain structures (header, offsets, records) in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches.get_one::<String>("log_level").unwrap();
    let level_filter = match log_level_str.as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let file_path = matches.get_one::<String>("body").unwrap();
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let show_header = matches.get_flag("header");
    let show_offsets = matches.get_flag("offsets");
    let show_records = matches.get_flag("records");
    let pasco_output = matches.get_flag("pasco");
    let json_output = matches.get_flag("json");

    let mut layout = Layout::default();
    if let Some(bitmap_offset) = matches.get_one::<u64>("bitmap_offset") {
        layout = layout.with_bitmap_offset(*bitmap_offset);
    }

    let size = match matches.get_one::<u64>("size") {
        Some(size) => *size,
        None => match std::fs::metadata(file_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("Could not stat '{}': {}", file_path, e);
                return;
            }
        },
    };

    // 1) Prepare the "body" and create an IndexDat instance.
    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let mut slice = match BodySlice::new(&mut body, offset, size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };

    let mut index = match IndexDat::with_layout(&mut slice, layout) {
        Ok(idx) => idx,
        Err(e) => {
            error!("Couldn't open index.dat: {}", e);
            return;
        }
    };

    if show_header {
        if json_output {
            match serde_json::to_string_pretty(&index.header.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing header to JSON: {}", e),
            }
        } else {
            println!("{}", index.header.to_string());
        }
    }

    if show_offsets {
        let offsets = match index.valid_offsets() {
            Ok(o) => o,
            Err(e) => {
                error!("Hash table scan failed: {}", e);
                return;
            }
        };
        if json_output {
            let off_json = json!({ "offsets": offsets });
            match serde_json::to_string_pretty(&off_json) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing offsets to JSON: {}", e),
            }
        } else {
            for off in offsets {
                println!("0x{:08X}", off);
            }
        }
    }

    if show_records || pasco_output {
        let records = match index.records() {
            Ok(r) => r,
            Err(e) => {
                error!("Record extraction failed: {}", e);
                return;
            }
        };

        if pasco_output {
            println!(
                "History File: {} Version: {}",
                file_path,
                index.header.version()
            );
            println!();
            println!("TYPE\tURL\tMODIFIED TIME\tACCESS TIME\tFILENAME\tDIRECTORY\tHTTP HEADERS");
            for rec in &records {
                println!("{}", rec.to_pasco_line(&index.header));
            }
        } else if json_output {
            let arr: Vec<Value> = records.iter().map(|r| r.to_json()).collect();
            let rec_json = json!({ "records": arr });
            match serde_json::to_string_pretty(&rec_json) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing records to JSON: {}", e),
            }
        } else {
            for rec in records {
                println!("{}", rec.to_string());
            }
        }
    }
}
