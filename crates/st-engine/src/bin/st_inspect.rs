use anyhow::{bail, Context};
use st_engine::{k_values, summarize_results, TrialDetail};
use st_store::{RecordHandle, SeedLayout, DEFAULT_CACHE_ROOT};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: st-inspect <seed> <command>

commands:
  replay                          every stored configuration and its metric
  show <handle>                   full record for a handle
  score <handle> <rep> [k ...]    recompute pass@k from an archived attempt
  stats                           record count and archive size";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (seed, command) = match args.as_slice() {
        [seed, command, ..] => (seed.parse::<u64>().context("seed must be an integer")?, command),
        _ => bail!("{USAGE}"),
    };

    let root = std::env::var("SAMPLETUNE_CACHE_DIR")
        .unwrap_or_else(|_| DEFAULT_CACHE_ROOT.to_string());
    let layout = SeedLayout::new(&root, seed);
    if !layout.store_path().exists() {
        bail!("no result store at {}", layout.store_path().display());
    }
    let store = layout.open_store()?;

    match (command.as_str(), &args[2..]) {
        ("replay", _) => {
            for (config, value) in store.replay()? {
                println!("{value}\t{config}");
            }
        }
        ("show", [handle]) => {
            let handle = RecordHandle::new(handle.parse().context("handle must be an integer")?);
            let Some(record) = store.get(handle)? else {
                bail!("no record with handle {handle}");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            if let Ok(detail) = serde_json::from_value::<TrialDetail>(record.result) {
                println!(
                    "{} repetitions, complete: {}",
                    detail.tries.len(),
                    detail.complete
                );
            }
        }
        ("score", [handle, repetition, ks @ ..]) => {
            let handle = RecordHandle::new(handle.parse().context("handle must be an integer")?);
            let repetition: usize = repetition.parse().context("repetition must be an integer")?;
            let ks: Vec<usize> = if ks.is_empty() {
                let metric_name = store
                    .get(handle)?
                    .map(|r| r.metric_name)
                    .with_context(|| format!("no record with handle {handle}"))?;
                let target = metric_name
                    .strip_prefix("pass@")
                    .and_then(|k| k.parse().ok())
                    .with_context(|| format!("metric {metric_name} is not a pass@k metric"))?;
                k_values(target)
            } else {
                ks.iter()
                    .map(|k| k.parse::<usize>().context("k must be an integer"))
                    .collect::<anyhow::Result<_>>()?
            };

            let path = layout.attempt_path(handle, repetition);
            for (label, score) in summarize_results(&path, &ks)
                .with_context(|| format!("reading {}", path.display()))?
            {
                println!("{label}\t{score:.4}");
            }
        }
        ("stats", _) => {
            let archive = layout.archive_stats()?;
            println!("records\t{}", store.len()?);
            println!("archived attempts\t{}", archive.total_files);
            println!("archive size\t{:.2} MB", archive.total_size_mb());
        }
        _ => bail!("{USAGE}"),
    }

    store.close()?;
    Ok(())
}
