//! Outbound delivery to the agent runtime. Out of scope: the runtime itself;
//! in scope: the external-process contract this crate invokes against it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::error;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, channel: &str, message: &str) -> anyhow::Result<()>;
}

/// Shells out to the host's agent binary: `<binary> agent --session-id main
/// --deliver --channel <channel> --message <message>`, with a 30s deadline.
pub struct ProcessDelivery {
    binary: String,
    session_id: String,
    timeout: Duration,
}

impl ProcessDelivery {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into(), session_id: "main".to_string(), timeout: DELIVERY_TIMEOUT }
    }
}

#[async_trait]
impl Delivery for ProcessDelivery {
    async fn deliver(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("agent")
            .arg("--session-id")
            .arg(&self.session_id)
            .arg("--deliver")
            .arg("--channel")
            .arg(channel)
            .arg("--message")
            .arg(message);

        let run = async {
            let output = cmd.output().await?;
            if !output.status.success() {
                anyhow::bail!("delivery command exited with {}", output.status);
            }
            Ok::<(), anyhow::Error>(())
        };

        match timeout(self.timeout, run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("delivery command failed: {e}");
                Err(e)
            }
            Err(_) => {
                error!("delivery command timed out after {:?}", self.timeout);
                anyhow::bail!("delivery timed out after {:?}", self.timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_binary_fails_without_panicking() {
        let delivery = ProcessDelivery::new("definitely-not-a-real-binary-xyz");
        let result = delivery.deliver("telegram", "hello").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn true_binary_succeeds() {
        let delivery = ProcessDelivery::new("true");
        let result = delivery.deliver("telegram", "hello").await;
        assert!(result.is_ok());
    }
}
