//! 命令处理器注册表

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::command::CommandKind;
use super::handler::CommandHandler;

/// 命令处理器注册表，以 [`CommandKind`] 为键
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型的旧处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> &mut Self {
        let kind = handler.kind();
        debug!(kind = %kind, "注册命令处理器");
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: CommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn registered_kinds(&self) -> Vec<CommandKind> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Command, CommandOutcome};
    use crate::error::Result;
    use async_trait::async_trait;

    struct Echo(CommandKind);

    #[async_trait]
    impl CommandHandler for Echo {
        fn kind(&self) -> CommandKind {
            self.0
        }

        async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
            Ok(CommandOutcome::reply(command.actor(), self.0.as_str()))
        }
    }

    #[test]
    fn test_register_and_replace() {
        let mut registry = CommandRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(Arc::new(Echo(CommandKind::Balance)))
            .register(Arc::new(Echo(CommandKind::MyKeys)));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(CommandKind::Balance));
        assert!(!registry.contains(CommandKind::ClaimKey));

        registry.register(Arc::new(Echo(CommandKind::Balance)));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_routes_to_handler() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(Echo(CommandKind::Balance)));

        let command = Command::Balance {
            user_id: "1".to_string(),
        };
        let handler = registry.get(command.kind()).unwrap();
        let outcome = handler.handle(&command).await.unwrap();
        assert_eq!(outcome.text, "balance");
        assert_eq!(outcome.recipient, "1");
    }
}
