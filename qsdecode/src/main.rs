use getopts::Options;
use std::{
    env,
    fs::File,
    io::{Read, Write, stderr, stdin},
    path::Path,
    process,
};

use qsdecode::Decoder;

fn usage(prog: &str, msg: &str) -> ! {
    let path = Path::new(prog);
    let leaf = match path.file_name().and_then(|m| m.to_str()) {
        Some(m) => m,
        None => "qsdecode",
    };
    if !msg.is_empty() {
        writeln!(stderr(), "{}", msg).ok();
    }
    writeln!(stderr(), "Usage: {} [-d] [-p] <input file|->", leaf).ok();
    process::exit(1);
}

fn read_file(path: &str) -> String {
    let mut s = String::new();
    let r = if path == "-" {
        stdin().read_to_string(&mut s)
    } else {
        match File::open(path) {
            Ok(mut f) => f.read_to_string(&mut s),
            Err(e) => {
                writeln!(stderr(), "Can't open file {}: {}", path, e).ok();
                process::exit(1);
            }
        }
    };
    if let Err(e) = r {
        writeln!(stderr(), "Can't read {}: {}", path, e).ok();
        process::exit(1);
    }
    s
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let prog = args[0].clone();
    let matches = match Options::new()
        .optflag("d", "debug", "Print each parser step and handler call to stderr")
        .optflag("p", "pretty", "Pretty-print the JSON output")
        .optflag("h", "help", "")
        .parse(&args[1..])
    {
        Ok(m) => m,
        Err(f) => usage(&prog, f.to_string().as_str()),
    };
    if matches.opt_present("h") || matches.free.len() != 1 {
        usage(&prog, "");
    }

    let src = read_file(&matches.free[0]);
    let decoder = match Decoder::new() {
        Ok(d) => d,
        Err(e) => {
            writeln!(stderr(), "Can't build decoder: {}", e).ok();
            process::exit(1);
        }
    };
    let mut err = stderr();
    let trace = if matches.opt_present("d") {
        Some(&mut err as &mut dyn Write)
    } else {
        None
    };
    match decode(&decoder, trim_input(&src), trace, matches.opt_present("p")) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            writeln!(stderr(), "{}", e).ok();
            process::exit(1);
        }
    }
}

/// Strip the line ending(s) an input file typically ends with.
fn trim_input(src: &str) -> &str {
    src.trim_end_matches(['\r', '\n'])
}

/// Decode `input` to JSON, writing each parser step to `trace` if it is given.
fn decode(
    decoder: &Decoder,
    input: &str,
    trace: Option<&mut dyn Write>,
    pretty: bool,
) -> Result<String, String> {
    let table = match trace {
        Some(w) => decoder.decode_traced(input, |l| {
            writeln!(w, "{}", l).ok();
        }),
        None => decoder.decode(input),
    }
    .map_err(|e| e.to_string())?;
    if pretty {
        serde_json::to_string_pretty(&table)
    } else {
        serde_json::to_string(&table)
    }
    .map_err(|e| format!("Can't serialise output: {}", e))
}
