//! Validator and observer handler types.
//!
//! Handlers are registered against a single notification type. Each one
//! wraps a closure over the concrete notification; dispatch hands it the
//! erased notification and the wrapper downcasts before calling through.

use std::any::Any;

use thiserror::Error;

use crate::{
    AnyNotification, BlockChainConfiguration, CacheError, Height, Notification,
    NotificationType, StateCacheDelta, Timestamp, ValidationResult,
};

/// Direction in which observers apply a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    Commit,
    Rollback,
}

pub struct StatelessContext<'a> {
    pub config: &'a BlockChainConfiguration,
}

pub struct StatefulContext<'a> {
    pub config: &'a BlockChainConfiguration,
    pub height: Height,
    pub block_time: Timestamp,
    pub cache: &'a StateCacheDelta,
}

pub struct ObserverContext<'a> {
    pub config: &'a BlockChainConfiguration,
    pub height: Height,
    pub block_time: Timestamp,
    pub mode: NotifyMode,
    pub cache: &'a mut StateCacheDelta,
}

impl ObserverContext<'_> {
    pub fn is_commit(&self) -> bool {
        self.mode == NotifyMode::Commit
    }

    pub fn is_rollback(&self) -> bool {
        self.mode == NotifyMode::Rollback
    }
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("state inconsistent with notification: {0}")]
    Inconsistent(String),
}

type StatelessFn = dyn Fn(&dyn Any, &StatelessContext<'_>) -> ValidationResult + Send + Sync;
type StatefulFn = dyn Fn(&dyn Any, &StatefulContext<'_>) -> ValidationResult + Send + Sync;
type ObserverFn =
    dyn Fn(&dyn Any, &mut ObserverContext<'_>) -> Result<(), ObserverError> + Send + Sync;

/// A check that only looks at the notification itself
pub struct StatelessValidator {
    name: &'static str,
    notification_type: NotificationType,
    check: Box<StatelessFn>,
}

impl StatelessValidator {
    pub fn new<N, F>(name: &'static str, check: F) -> Self
    where
        N: Notification,
        F: Fn(&N, &StatelessContext<'_>) -> ValidationResult + Send + Sync + 'static,
    {
        let check = move |any: &dyn Any, context: &StatelessContext<'_>| {
            any.downcast_ref::<N>()
                .map(|x| check(x, context))
                .unwrap_or_default()
        };

        Self {
            name,
            notification_type: N::TYPE,
            check: Box::new(check),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn validate(
        &self,
        notification: &dyn AnyNotification,
        context: &StatelessContext<'_>,
    ) -> ValidationResult {
        (self.check)(notification.as_any(), context)
    }
}

/// A check that reads the state cache
pub struct StatefulValidator {
    name: &'static str,
    notification_type: NotificationType,
    check: Box<StatefulFn>,
}

impl StatefulValidator {
    pub fn new<N, F>(name: &'static str, check: F) -> Self
    where
        N: Notification,
        F: Fn(&N, &StatefulContext<'_>) -> ValidationResult + Send + Sync + 'static,
    {
        let check = move |any: &dyn Any, context: &StatefulContext<'_>| {
            any.downcast_ref::<N>()
                .map(|x| check(x, context))
                .unwrap_or_default()
        };

        Self {
            name,
            notification_type: N::TYPE,
            check: Box::new(check),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn validate(
        &self,
        notification: &dyn AnyNotification,
        context: &StatefulContext<'_>,
    ) -> ValidationResult {
        (self.check)(notification.as_any(), context)
    }
}

/// Applies (or reverts) the effect of a notification on the state cache
pub struct Observer {
    name: &'static str,
    notification_type: NotificationType,
    notify: Box<ObserverFn>,
}

impl Observer {
    pub fn new<N, F>(name: &'static str, notify: F) -> Self
    where
        N: Notification,
        F: Fn(&N, &mut ObserverContext<'_>) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        let notify = move |any: &dyn Any, context: &mut ObserverContext<'_>| match any
            .downcast_ref::<N>()
        {
            Some(x) => notify(x, context),
            None => Ok(()),
        };

        Self {
            name,
            notification_type: N::TYPE,
            notify: Box::new(notify),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn notify(
        &self,
        notification: &dyn AnyNotification,
        context: &mut ObserverContext<'_>,
    ) -> Result<(), ObserverError> {
        (self.notify)(notification.as_any(), context)
    }
}
