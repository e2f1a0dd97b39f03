use depot_dl::ProcessRequest;
use miette::{miette, Result};
use nu_ansi_term::Color::{Green, Red};
use tracing::{info, warn};

use crate::{context::DepotContext, utils::Colored};

fn parse_command(line: &str) -> Option<ProcessRequest> {
    let mut words = line.split_whitespace();
    let program = words.next()?;
    Some(ProcessRequest::new(program).args(words))
}

/// Runs every command through the process scheduler and waits for all of
/// them, so at most `max_parallel_processes` run at once.
pub fn exec(ctx: &DepotContext, commands: &[String]) -> Result<()> {
    let executor = ctx
        .event_loop
        .process()
        .ok_or_else(|| miette!("process scheduler is not available"))?;

    let requests: Vec<ProcessRequest> = commands
        .iter()
        .filter_map(|line| parse_command(line))
        .collect();
    let mut futures = requests
        .iter()
        .map(|request| executor.execute_async(request.clone()))
        .collect::<depot_dl::Result<Vec<_>>>()?;

    ctx.event_loop.wait_settled(&mut futures, Some(&ctx.events));

    let mut failed = 0;
    for (request, future) in requests.iter().zip(futures.iter_mut()) {
        match future.take() {
            Some(Ok(output)) if output.success() => {
                info!("{} {}", Colored(Green, "✓"), request.display());
                if !output.stdout.is_empty() {
                    info!("{}", output.stdout.trim_end());
                }
            }
            Some(Ok(output)) => {
                failed += 1;
                warn!(
                    "{} {} exited with {:?}",
                    Colored(Red, "✗"),
                    request.display(),
                    output.status
                );
                if !output.stderr.is_empty() {
                    warn!("{}", output.stderr.trim_end());
                }
            }
            Some(Err(err)) => {
                failed += 1;
                warn!("{} {}: {err}", Colored(Red, "✗"), request.display());
            }
            None => failed += 1,
        }
    }

    if failed > 0 {
        return Err(miette!("{failed} of {} commands failed", requests.len()));
    }
    Ok(())
}
