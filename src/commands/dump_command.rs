use super::exit_result::{ExitResult, EXIT_FAILURE};
use crate::{
    commands::{
        convert_command::{TARGET_ARCH, TARGET_OS},
        t2c_options::{T2cOptions, T2cSubCommand},
        T2cCommand,
    },
    corpus::CorpusDb,
    prog::Program,
    target::{get_target, Target},
};
use serde::Serialize;
use std::{
    io::{self, stdout, Write},
    path::PathBuf,
};

pub struct DumpCommand {
    corpus: PathBuf,
    json: bool,
}

impl DumpCommand {
    pub fn new(options: &T2cOptions) -> DumpCommand {
        match options.cmd.clone() {
            T2cSubCommand::Dump { corpus, json } => DumpCommand { corpus, json },
            _ => panic!("Unexpected T2cSubCommand variant. Not a `Dump` variant!"),
        }
    }

    fn dump(&self, target: &Target, f: &mut dyn Write) -> io::Result<()> {
        let db = CorpusDb::open(&self.corpus)?;
        if !self.json {
            writeln!(
                f,
                "# {}: version {}, {} records",
                self.corpus.display(),
                db.version(),
                db.len()
            )?;
        }
        for (key, rec) in db.records() {
            let parsed = Program::deserialize(target, &rec.val);
            if self.json {
                let entry = DumpEntry {
                    key,
                    seq: rec.seq,
                    size: rec.val.len(),
                    calls: parsed.as_ref().map_or(0, |p| p.calls.len()),
                    syscall_numbers: parsed
                        .as_ref()
                        .map(|p| p.calls.iter().map(|c| c.meta.nr).collect())
                        .unwrap_or_default(),
                    parse_error: parsed.as_ref().err().map(|e| e.to_string()),
                };
                let line = serde_json::to_string(&entry)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                writeln!(f, "{}", line)?;
                continue;
            }

            writeln!(f, "{} seq={} size={}", key, rec.seq, rec.val.len())?;
            if let Err(e) = parsed {
                writeln!(f, "  !! {}", e)?;
            }
            for line in String::from_utf8_lossy(&rec.val).lines() {
                writeln!(f, "  {}", line)?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DumpEntry<'a> {
    key: &'a str,
    seq: u64,
    size: usize,
    calls: usize,
    /// Kernel syscall numbers of the calls, in program order.
    syscall_numbers: Vec<u64>,
    parse_error: Option<String>,
}

impl T2cCommand for DumpCommand {
    fn run(&mut self) -> ExitResult<()> {
        let target = match get_target(TARGET_OS, TARGET_ARCH) {
            Ok(target) => target,
            Err(e) => return ExitResult::err_from(e, EXIT_FAILURE),
        };
        match self.dump(&target, &mut stdout()) {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => ExitResult::err_from(e, EXIT_FAILURE),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use structopt::StructOpt;

    fn dump_to_string(path: &std::path::Path, json: bool) -> String {
        let mut argv = vec!["trace2corpus", "dump", path.to_str().unwrap()];
        if json {
            argv.push("--json");
        }
        let cmd = DumpCommand::new(&T2cOptions::from_iter(argv));
        let target = get_target(TARGET_OS, TARGET_ARCH).unwrap();
        let mut out = Vec::new();
        cmd.dump(&target, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn lists_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let mut db = CorpusDb::open(&path).unwrap();
        db.save("a", b"getpid()\ngetuid()\n", 0).unwrap();
        db.save("b", b"no_such_call()\n", 4).unwrap();
        db.bump_version(3);
        db.flush().unwrap();

        let text = dump_to_string(&path, false);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("version 3, 2 records"));
        assert_eq!(lines[1], "a seq=0 size=18");
        assert_eq!(lines[2], "  getpid()");
        assert_eq!(lines[3], "  getuid()");
        assert_eq!(lines[4], "b seq=4 size=15");
        assert!(lines[5].starts_with("  !! "));

        let json = dump_to_string(&path, true);
        let entries: Vec<serde_json::Value> = json
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["key"], "a");
        assert_eq!(entries[0]["calls"], 2);
        // getpid and getuid on x86-64.
        assert_eq!(entries[0]["syscallNumbers"], serde_json::json!([39, 102]));
        assert_eq!(entries[1]["syscallNumbers"], serde_json::json!([]));
        assert!(entries[0]["parseError"].is_null());
        assert_eq!(entries[1]["seq"], 4);
        assert!(entries[1]["parseError"].is_string());
    }
}
