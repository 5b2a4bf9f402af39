use plate_reader::cli;
use plate_reader::config::Preset;

// Every frame is searched; the last four characters of each plate go to the
// board found by vendor name.
fn main() -> anyhow::Result<()> {
    cli::run(Preset::Continuous)
}
