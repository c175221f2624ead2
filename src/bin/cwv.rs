use cacheweave::cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        let msg = e.to_string();
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
