//! Demo binary exercising `dataflow-core` filter graphs end to end.
//!
//! Not part of the core's public contract — see `DESIGN.md` — this binary
//! wires up a handful of the specification's worked scenarios and prints
//! their outcome, the way the teacher's own `rhai_runner` binary exercises
//! its scripting crate rather than being part of its API surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use dataflow_core::sinks::aggregator::{Aggregator, OverflowPolicy};
use dataflow_core::sources::signal_generator::{SignalGenerator, Waveform};
use dataflow_core::{Dtype, Filter, Policy};
use dataflow_scripting::RhaiTransform;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Source -> identity filter -> aggregator; verifies exact passthrough.
    Passthrough,
    /// One source fanning out to three aggregator sinks.
    FanOut,
    /// A sine-wave signal generator feeding an aggregator.
    SignalGen,
    /// Source -> Rhai-scripted hosted filter -> aggregator.
    Scripted,
}

#[derive(Debug, Parser)]
#[command(about = "Runs one of dataflow-core's worked example graphs")]
struct Cli {
    /// Which scenario to run.
    #[arg(value_enum, default_value_t = Scenario::SignalGen)]
    scenario: Scenario,

    /// How many samples to wait for before reporting results.
    #[arg(long, default_value_t = 300)]
    samples: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.scenario {
        Scenario::Passthrough => run_passthrough(cli.samples),
        Scenario::FanOut => run_fan_out(cli.samples),
        Scenario::SignalGen => run_signal_gen(cli.samples),
        Scenario::Scripted => run_scripted(cli.samples),
    }
}

fn counting_source(capacity_exp: u32) -> (Filter, Arc<AtomicU64>) {
    let counter = Arc::new(AtomicU64::new(0));
    let worker_counter = Arc::clone(&counter);
    let filter = Filter::native(Dtype::Float32, capacity_exp, 0, 1, move |_inputs, outputs| {
        let t = worker_counter.fetch_add(1, Ordering::Relaxed);
        if let Some(output) = outputs.first_mut() {
            if let Some(samples) = output.as_f32_mut() {
                samples[0] = t as f32;
            }
            output.set_used_len(1).expect("capacity >= 1");
        }
    })
    .expect("valid source config");
    (filter, counter)
}

fn wait_for(sizes: impl Fn() -> usize, target: usize) {
    while sizes() < target {
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn run_passthrough(samples: usize) -> Result<()> {
    let (source, _) = counting_source(6);
    let identity = Filter::passthrough(Dtype::Float32, 6).context("constructing identity filter")?;
    let aggregator = Aggregator::new(Dtype::Float32, 6, 1, samples * Dtype::Float32.sample_size() * 2, OverflowPolicy::Reject)
        .context("constructing aggregator")?;

    source.connect(&identity, 0, Policy::Block)?;
    identity.connect(&aggregator, 0, Policy::Block)?;

    aggregator.start()?;
    identity.start()?;
    source.start()?;

    wait_for(|| aggregator.sizes()[0], samples);

    source.stop()?;
    identity.stop()?;
    aggregator.stop()?;

    println!("passthrough: collected {} samples", aggregator.sizes()[0]);
    Ok(())
}

fn run_fan_out(samples: usize) -> Result<()> {
    let (source, _) = counting_source(6);
    let sinks: Vec<Aggregator> = (0..3)
        .map(|_| Aggregator::new(Dtype::Float32, 6, 1, samples * Dtype::Float32.sample_size() * 2, OverflowPolicy::Reject))
        .collect::<dataflow_core::Result<_>>()
        .context("constructing aggregators")?;
    for sink in &sinks {
        source.connect(sink, 0, Policy::Block)?;
    }

    for sink in &sinks {
        sink.start()?;
    }
    source.start()?;

    wait_for(|| sinks.iter().map(|s| s.sizes()[0]).min().unwrap_or(0), samples);

    source.stop()?;
    for sink in &sinks {
        sink.stop()?;
    }

    println!("fan-out: every one of {} sinks collected {} samples", sinks.len(), samples);
    Ok(())
}

fn run_signal_gen(samples: usize) -> Result<()> {
    let generator =
        SignalGenerator::new(Waveform::Sine, 0.01, 1.0, 0.0, 0.0, 6, 8).context("constructing signal generator")?;
    let aggregator = Aggregator::new(Dtype::Float32, 6, 1, samples * Dtype::Float32.sample_size() * 2, OverflowPolicy::Reject)
        .context("constructing aggregator")?;
    generator.connect(&aggregator, 0, Policy::Block)?;

    aggregator.start()?;
    generator.start()?;

    wait_for(|| aggregator.sizes()[0], samples);

    generator.stop()?;
    aggregator.stop()?;

    println!("signal generator: collected {} samples of a 0.01 cycles/sample sine wave", aggregator.sizes()[0]);
    Ok(())
}

fn run_scripted(samples: usize) -> Result<()> {
    let (source, _) = counting_source(6);
    let script = RhaiTransform::compile(
        "fn transform(inputs) { let out = []; for x in inputs[0] { out.push(x * 3.0); } [out] }",
        "transform",
    )
    .context("compiling rhai transform")?;
    let tripler = Filter::hosted(Dtype::Float32, 6, Arc::new(script)).context("constructing hosted filter")?;
    let aggregator = Aggregator::new(Dtype::Float32, 6, 1, samples * Dtype::Float32.sample_size() * 2, OverflowPolicy::Reject)
        .context("constructing aggregator")?;

    source.connect(&tripler, 0, Policy::Block)?;
    tripler.connect(&aggregator, 0, Policy::Block)?;

    aggregator.start()?;
    tripler.start()?;
    source.start()?;

    wait_for(|| aggregator.sizes()[0], samples);

    source.stop()?;
    tripler.stop()?;
    aggregator.stop()?;

    println!(
        "scripted: collected {} samples through a Rhai transform that triples each sample",
        aggregator.sizes()[0]
    );
    Ok(())
}
