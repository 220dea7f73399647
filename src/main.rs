use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    config_dir: Option<PathBuf>,
    null_audio: bool,
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    ktvplay::app::run(ktvplay::app::AppOptions {
        config_dir: args.config_dir,
        null_audio: args.null_audio,
        files: args.files,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--null-audio" => out.null_audio = true,
            "--config-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--config-dir requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--config-dir cannot be empty");
                }
                out.config_dir = Some(PathBuf::from(value.trim()));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument {other}"),
            file => out.files.push(PathBuf::from(file)),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("ktvplay [OPTIONS] [FILE...]");
    println!("  --config-dir DIR  Keep state and logs in DIR");
    println!("  --null-audio      Simulate playback without an audio device");
    println!("  FILE              Media files to queue on start (.mkv, .mpg)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_files() {
        let raw = args(&["--null-audio", "--config-dir", "/tmp/k", "a.mkv", "b.mpg"]);
        let parsed = parse_args(raw).expect("parse");
        assert!(parsed.null_audio);
        assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/k")));
        assert_eq!(parsed.files, vec![PathBuf::from("a.mkv"), PathBuf::from("b.mpg")]);
    }

    #[test]
    fn rejects_unknown_flags_and_missing_values() {
        assert!(parse_args(args(&["--loud"])).is_err());
        assert!(parse_args(args(&["--config-dir"])).is_err());
    }
}
