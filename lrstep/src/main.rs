use getopts::Options;
use std::{
    env,
    fs::File,
    io::{Read, Write, stderr, stdin},
    path::Path,
    process,
};

use lrstep::LexerDef;

fn usage(prog: &str, msg: &str) -> ! {
    let path = Path::new(prog);
    let leaf = match path.file_name().and_then(|m| m.to_str()) {
        Some(m) => m,
        None => "lrstep",
    };
    if !msg.is_empty() {
        writeln!(stderr(), "{}", msg).ok();
    }
    writeln!(stderr(), "Usage: {} <rules file> <input file|->", leaf).ok();
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

/// Parse a rules file: one `NAME PATTERN` rule per non-blank line, in priority order.
fn lexerdef(src: &str) -> Result<LexerDef, String> {
    let mut ld = LexerDef::new();
    for (i, line) in src.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, pattern) = match line.split_once(char::is_whitespace) {
            Some((n, p)) if !p.trim().is_empty() => (n, p.trim()),
            _ => return Err(format!("line {}: expected 'NAME PATTERN'", i + 1)),
        };
        let tok_id = u32::try_from(ld.rules_len()).map_err(|e| e.to_string())?;
        ld.push(tok_id, name, pattern)
            .map_err(|e| format!("line {}: {}", i + 1, e))?;
    }
    Ok(ld)
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let prog = args[0].clone();
    let matches = match Options::new().optflag("h", "help", "").parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => usage(&prog, f.to_string().as_str()),
    };
    if matches.opt_present("h") || matches.free.len() != 2 {
        usage(&prog, "");
    }

    let ld = match lexerdef(&read_file(&matches.free[0])) {
        Ok(ld) => ld,
        Err(e) => {
            writeln!(stderr(), "{}: {}", &matches.free[0], e).ok();
            process::exit(1);
        }
    };
    let input = read_file(&matches.free[1]);
    let lexer = ld.lexer(&input);
    for r in ld.lexer(&input) {
        match r {
            Ok(l) => {
                let name = ld.get_rule_by_id(l.tok_id()).map_or("", |r| r.name.as_str());
                println!("{} {}", name, lexer.span_str(l.span()));
            }
            Err(e) => {
                writeln!(stderr(), "{} ('{}')", e, lexer.span_str(e.span())).ok();
                process::exit(1);
            }
        }
    }
}
