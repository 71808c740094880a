//! `healthCheck` and `system.*` procedures.

use super::blocking;
use futures::Stream;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use whatif_core::config::StreamConfig;
use whatif_core::{Result, SystemInfo, Tick};

pub async fn health_check(_: ()) -> Result<&'static str> {
    Ok("ok")
}

pub async fn info(_: ()) -> Result<SystemInfo> {
    blocking(|| Ok(SystemInfo::collect())).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicksInput {
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl TicksInput {
    fn interval(&self) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or(StreamConfig::DEFAULT_TICK_INTERVAL)
            .max(StreamConfig::MIN_TICK_INTERVAL)
    }
}

/// One tick immediately, then one per interval. `seq` starts at 0.
pub async fn ticks(input: TicksInput) -> Result<impl Stream<Item = Result<Tick>>> {
    let mut timer = tokio::time::interval(input.interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    Ok(futures::stream::unfold((timer, 0u64), |(mut timer, seq)| async move {
        timer.tick().await;
        Some((Ok(Tick::now(seq)), (timer, seq + 1)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_interval_is_clamped() {
        let input = TicksInput { interval_ms: Some(0) };
        assert_eq!(input.interval(), StreamConfig::MIN_TICK_INTERVAL);
        assert_eq!(
            TicksInput::default().interval(),
            StreamConfig::DEFAULT_TICK_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_ticks_are_sequential() {
        let stream = ticks(TicksInput { interval_ms: Some(10) }).await.unwrap();
        let seqs: Vec<u64> = stream
            .take(3)
            .map(|tick| tick.unwrap().seq)
            .collect()
            .await;
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_info_collects() {
        let info = info(()).await.unwrap();
        assert!(info.cpu_count > 0);
    }
}
