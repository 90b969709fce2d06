use std::process::ExitCode;

use burn::backend::Autodiff;
use clap::Parser;
use lenet_mnist::{cli::Cli, training};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "wgpu")]
type Backend = burn::backend::Wgpu;

#[cfg(not(feature = "wgpu"))]
type Backend = burn::backend::NdArray<f32>;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = cli.training_config().and_then(|config| {
        training::execute::<Autodiff<Backend>>(
            &config,
            &cli.modes,
            cli.predict_count,
            Default::default(),
        )
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
