//! Control commands.

use tracing::debug;

use super::link::{Link, LinkError};
use crate::session::Role;

/// A control request for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Establish the session.
    Connect,
    /// Tear the session down and stop reconnecting.
    Disconnect,
    /// Report whether the link is connected.
    GetStatus,
    /// Change the role; only [`Role::Endpoint`] is accepted.
    SetRole(Role),
}

/// Result of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutput {
    /// The command completed.
    Done,
    /// Connection status.
    Connected(bool),
}

impl Link {
    /// Run a control command.
    pub async fn execute(&self, command: Command) -> Result<CommandOutput, LinkError> {
        debug!(device = self.device_id(), ?command, "control");
        match command {
            Command::Connect => {
                self.connect().await?;
                Ok(CommandOutput::Done)
            }
            Command::Disconnect => {
                self.disconnect().await;
                Ok(CommandOutput::Done)
            }
            Command::GetStatus => Ok(CommandOutput::Connected(self.is_connected())),
            Command::SetRole(role) => {
                self.set_role(role);
                Ok(CommandOutput::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkConfig;
    use crate::session::LinkState;

    #[tokio::test]
    async fn test_command_sequence() {
        let config = LinkConfig::builder().loopback(true).build().unwrap();
        let link = Link::new(1, config);

        assert_eq!(
            link.execute(Command::GetStatus).await.unwrap(),
            CommandOutput::Connected(false)
        );
        assert_eq!(link.execute(Command::Connect).await.unwrap(), CommandOutput::Done);
        assert_eq!(
            link.execute(Command::GetStatus).await.unwrap(),
            CommandOutput::Connected(true)
        );

        link.execute(Command::Disconnect).await.unwrap();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.role(), Role::None);
    }

    #[tokio::test]
    async fn test_set_role_ignores_other_roles() {
        let link = Link::new(1, LinkConfig::default());
        link.execute(Command::SetRole(Role::Loopback)).await.unwrap();
        assert_eq!(link.role(), Role::None);

        link.execute(Command::SetRole(Role::Endpoint)).await.unwrap();
        assert_eq!(link.role(), Role::Endpoint);
    }
}
