use cacheweave::cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        let msg = e.to_string();
        // These failures have already been rendered as diagnostics.
        if msg.contains("lexing failed")
            || msg.contains("parsing failed")
            || msg.contains("weaving failed")
        {
            std::process::exit(1);
        }
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use cacheweave::cli::{CacheWeaveCli, Command, FormatArg};

    #[test]
    fn weave_command_honors_output_flag() {
        let cli = CacheWeaveCli::parse_from([
            "cacheweave",
            "weave",
            "modules/calc.cwil",
            "--output",
            "target/calc.json",
            "--format",
            "json",
        ]);
        match cli.command() {
            Command::Weave {
                input,
                output,
                format,
            } => {
                assert_eq!(input.to_string_lossy(), "modules/calc.cwil");
                assert_eq!(
                    output.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    Some("target/calc.json".into())
                );
                assert_eq!(*format, Some(FormatArg::Json));
            }
            other => panic!("expected weave command, got {other:?}"),
        }
    }
}
