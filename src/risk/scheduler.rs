use crate::data::{Positions, ReturnsData};
use crate::risk::monitor::RiskMonitor;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Supplies the position and return snapshot for each periodic check
pub trait PortfolioSource: Send + Sync {
    fn snapshot(&self) -> Result<(Positions, ReturnsData)>;
}

impl<F> PortfolioSource for F
where
    F: Fn() -> Result<(Positions, ReturnsData)> + Send + Sync,
{
    fn snapshot(&self) -> Result<(Positions, ReturnsData)> {
        self()
    }
}

/// Run `check_portfolio_risk` every `interval` until `shutdown` flips to
/// true (or its sender is dropped). Returns the number of checks that ran.
///
/// Source and calculation failures are logged and the loop keeps going.
pub async fn run_monitoring<S>(
    monitor: Arc<RiskMonitor>,
    source: S,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize
where
    S: PortfolioSource,
{
    info!("Starting risk monitoring every {:?}", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut checks = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match source.snapshot() {
                    Ok((positions, returns)) => {
                        match monitor.check_portfolio_risk(&positions, &returns) {
                            Ok(alerts) if !alerts.is_empty() => {
                                warn!("Generated {} risk alerts", alerts.len());
                            }
                            Ok(_) => {}
                            Err(e) => error!("Risk check failed: {}", e),
                        }
                        checks += 1;
                    }
                    Err(e) => error!("Error getting portfolio snapshot: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Stopped risk monitoring after {} checks", checks);
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ReturnSeries, Severity};
    use crate::risk::calculator::RiskCalculator;
    use crate::risk::limits::RiskLimit;
    use crate::risk::metrics::MetricType;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> Result<(Positions, ReturnsData)> {
        let mut positions = Positions::new();
        positions.insert("A".into(), 150000.0);
        positions.insert("B".into(), 50000.0);

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start, &[0.001; 40]));
        returns.insert("B".into(), ReturnSeries::from_values(start, &[0.002; 40]));
        Ok((positions, returns))
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_checks_until_shutdown() {
        let monitor = Arc::new(
            RiskMonitor::new(RiskCalculator::default()).with_limits([RiskLimit::new(
                "position_limit",
                MetricType::PositionSize,
                0.10,
                Severity::Warning,
            )]),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_monitoring(
            Arc::clone(&monitor),
            snapshot,
            Duration::from_secs(60),
            rx,
        ));

        // first tick fires immediately, then at 60s and 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();

        let checks = handle.await.unwrap();
        assert_eq!(checks, 3);
        assert_eq!(monitor.breach_count("position_limit"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_errors_do_not_stop_loop() {
        let monitor = Arc::new(RiskMonitor::new(RiskCalculator::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = move || -> Result<(Positions, ReturnsData)> {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("data store unavailable")
        };
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_monitoring(monitor, source, Duration::from_secs(10), rx));
        tokio::time::sleep(Duration::from_secs(25)).await;
        drop(tx);

        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
