use plate_reader::cli;
use plate_reader::config::Preset;

// Press 'c' to read the plate in view, 'q' to quit.
fn main() -> anyhow::Result<()> {
    cli::run(Preset::OnDemand)
}
