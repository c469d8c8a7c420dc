//! One-shot runs of the daemon's background jobs.

use anyhow::Result;
use lcg_runtime::{GuardRuntime, SweepOutcome};

pub async fn sweep_once(rt: &GuardRuntime, holder: &str) -> Result<()> {
    match rt.reclaimer.sweep_once(holder).await? {
        SweepOutcome::Completed(r) => {
            println!("sweep=completed");
            println!("marked={}", r.marked);
            println!("reminded={}", r.reminded);
            println!("reminders_skipped={}", r.reminders_skipped);
            println!("deleted={}", r.deleted);
            println!("delete_failures={}", r.delete_failures);
        }
        SweepOutcome::Skipped => {
            println!("sweep=skipped reason=lease_held");
        }
    }
    Ok(())
}

pub async fn dispatch_once(rt: &GuardRuntime) -> Result<()> {
    let r = rt.outbox.dispatch_once().await?;
    println!(
        "claimed={} sent={} retried={} dead={}",
        r.claimed, r.sent, r.retried, r.dead
    );
    Ok(())
}

pub async fn prune_rate_limits(rt: &GuardRuntime) -> Result<()> {
    let dropped = rt.prune_rate_limits().await?;
    println!("pruned={dropped}");
    Ok(())
}
