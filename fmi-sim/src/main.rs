use clap::Parser;
use fmi_sim::{options, sim::io::write_csv, simulate};

fn main() -> anyhow::Result<()> {
    let args = options::FmiSimOptions::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_timestamp_millis()
        .init();

    let output = simulate(&args)?;

    match &args.output_file {
        Some(path) => {
            write_csv(path, &output)?;
            log::info!("Wrote {} rows to {}", output.num_rows(), path.display());
        }
        None => println!(
            "Outputs:\n{}",
            arrow::util::pretty::pretty_format_batches(&[output])?
        ),
    }

    Ok(())
}
