mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: flow-emulator [--profile <session|faults>] [--fail-first <n>]";

#[derive(Debug, Default)]
struct Options {
    profile: Option<TranscriptProfile>,
    fail_first: Option<usize>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let profile = options.profile.unwrap_or(TranscriptProfile::Session);
    let mut session = Session::new(profile, options.fail_first)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Flow board emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options<I>(args: I) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };

        match flag.as_str() {
            "--profile" => {
                let value = inline
                    .or_else(|| args.next())
                    .ok_or("Expected value after --profile")?;
                options.profile = Some(TranscriptProfile::from_tag(&value)?);
            }
            "--fail-first" => {
                let value = inline
                    .or_else(|| args.next())
                    .ok_or("Expected value after --fail-first")?;
                let count = value
                    .parse()
                    .map_err(|_| format!("Invalid send count `{value}`"))?;
                options.fail_first = Some(count);
            }
            other if options.profile.is_none() && !other.starts_with('-') => {
                options.profile = Some(TranscriptProfile::from_tag(other)?);
            }
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        parse_options(args.iter().map(|arg| (*arg).to_string()))
    }

    #[test]
    fn flags_accept_inline_and_separate_values() {
        let options = parse(&["--profile=faults", "--fail-first", "2"]).expect("options");
        assert_eq!(options.profile, Some(TranscriptProfile::Faults));
        assert_eq!(options.fail_first, Some(2));
    }

    #[test]
    fn bare_profile_tag_is_accepted() {
        let options = parse(&["session"]).expect("options");
        assert_eq!(options.profile, Some(TranscriptProfile::Session));
        assert_eq!(options.fail_first, None);
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(parse(&["--fail-first", "lots"]).is_err());
        assert!(parse(&["--profile"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
