use anyhow::Result;

fn main() -> Result<()> {
    netseg::cli::run()
}
