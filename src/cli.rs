use crate::{Error, Result};

/// Options for the `run` command; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub device: Option<String>,
    pub baud: Option<u32>,
    pub heartbeat_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    ListPorts,
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            None => Ok(Command::Run(RunOptions::default())),
            Some("run") => Ok(Command::Run(parse_run_options(&mut iter)?)),
            Some("ports") => match iter.next() {
                None => Ok(Command::ListPorts),
                Some(extra) => Err(Error::InvalidArgs(format!(
                    "unexpected argument '{extra}' for ports"
                ))),
            },
            Some("--help") | Some("-h") | Some("help") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // `run` may be omitted: reparse everything as run flags.
                let mut iter = args.iter();
                Ok(Command::Run(parse_run_options(&mut iter)?))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "solartty - terminal console for a dual-LDR solar tracker\n",
            "\n",
            "USAGE:\n",
            "  solartty [run] [--device <path|auto>] [--baud <number>] [--heartbeat-ms <ms>]\n",
            "                 [--log-level <level>] [--log-file <path>]\n",
            "  solartty ports\n",
            "  solartty --help\n",
            "  solartty --version\n",
            "\n",
            "OPTIONS:\n",
            "  --device <path|auto>  Serial device; 'auto' picks from detected ports (default: auto)\n",
            "  --baud <number>       Baud rate (default: 9600)\n",
            "  --heartbeat-ms <ms>   Heartbeat period in milliseconds (default: 1000)\n",
            "  --log-level <level>   error, warn, info, debug or trace (default: info)\n",
            "  --log-file <path>     Append logs to this file as well as stderr\n",
            "  -h, --help            Show this help\n",
            "  -V, --version         Show version\n",
            "\n",
            "Settings are read from ~/.solartty/config.toml; flags override it.\n",
            "Type 'help' at the console prompt for tracker commands.\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--device" => {
                opts.device = Some(take_value(flag, iter)?);
            }
            "--baud" => {
                let raw = take_value(flag, iter)?;
                let baud: u32 = raw.parse().map_err(|_| {
                    Error::InvalidArgs("baud must be a positive integer".to_string())
                })?;
                if baud == 0 {
                    return Err(Error::InvalidArgs(
                        "baud must be a positive integer".to_string(),
                    ));
                }
                opts.baud = Some(baud);
            }
            "--heartbeat-ms" => {
                let raw = take_value(flag, iter)?;
                opts.heartbeat_ms = Some(raw.parse().map_err(|_| {
                    Error::InvalidArgs("heartbeat-ms must be a positive integer".to_string())
                })?);
            }
            "--log-level" => {
                let raw = take_value(flag, iter)?;
                raw.parse::<crate::app::LogLevel>()
                    .map_err(Error::InvalidArgs)?;
                opts.log_level = Some(raw);
            }
            "--log-file" => {
                opts.log_file = Some(take_value(flag, iter)?);
            }
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults_with_no_args() {
        let cmd = Command::parse(&[]).unwrap();
        assert_eq!(cmd, Command::Run(RunOptions::default()));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cmd = Command::parse(&args(&[
            "run",
            "--device",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "--heartbeat-ms",
            "500",
            "--log-level",
            "debug",
            "--log-file",
            "/tmp/solartty.log",
        ]))
        .unwrap();
        let expected = RunOptions {
            device: Some("/dev/ttyACM0".into()),
            baud: Some(115_200),
            heartbeat_ms: Some(500),
            log_level: Some("debug".into()),
            log_file: Some("/tmp/solartty.log".into()),
        };
        assert_eq!(cmd, Command::Run(expected));
    }

    #[test]
    fn run_keyword_is_optional() {
        let cmd = Command::parse(&args(&["--device", "auto"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run(RunOptions {
                device: Some("auto".into()),
                ..RunOptions::default()
            })
        );
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(Command::parse(&args(&["ports"])).unwrap(), Command::ListPorts);
        assert_eq!(Command::parse(&args(&["--help"])).unwrap(), Command::ShowHelp);
        assert_eq!(Command::parse(&args(&["-V"])).unwrap(), Command::ShowVersion);
    }

    #[test]
    fn rejects_bad_input() {
        for bad in [
            vec!["frobnicate"],
            vec!["--baud"],
            vec!["--baud", "zero"],
            vec!["--baud", "0"],
            vec!["--log-level", "chatty"],
            vec!["run", "--cols", "16"],
            vec!["ports", "extra"],
        ] {
            let err = Command::parse(&args(&bad)).unwrap_err();
            assert!(matches!(err, Error::InvalidArgs(_)), "{bad:?}");
        }
    }
}
