//! Aggregate validator and observer dispatch over published notifications.

use rayon::prelude::*;
use tracing::{instrument, trace};

use crate::{
    FailureCode, Notifications, NotifyMode, ObserverContext, ObserverError, PluginRegistry,
    StatefulContext, StatelessContext, ValidationResult, WeakEntityInfo,
};

impl PluginRegistry {
    /// Publishes the notifications of one entity
    ///
    /// Publication errors (unknown type, malformed payload) are returned as a
    /// failure so they reject the entity like any structural check.
    pub fn notifications_of(
        &self,
        info: &WeakEntityInfo<'_>,
    ) -> Result<Notifications, ValidationResult> {
        let mut sink = Notifications::new();

        self.publisher()
            .publish(info, &mut sink)
            .map_err(|err| ValidationResult::Failure(FailureCode::from(&err)))?;

        Ok(sink)
    }

    /// Runs stateless validators over a notification sequence
    pub fn validate_stateless(&self, notifications: &Notifications) -> ValidationResult {
        let context = StatelessContext {
            config: self.config(),
        };

        let mut result = ValidationResult::Success;

        for notification in notifications.iter() {
            if !notification.channel().includes_validators() {
                continue;
            }

            let Some(indexes) = self.stateless_index.get(&notification.notification_type())
            else {
                continue;
            };

            for idx in indexes {
                let validator = &self.stateless[*idx];
                result = result.aggregate(validator.validate(notification, &context));

                if let ValidationResult::Failure(code) = result {
                    trace!(validator = validator.name(), %code, "stateless validation failed");
                    return result;
                }
            }
        }

        result
    }

    /// Runs stateful validators over a notification sequence
    pub fn validate_stateful(
        &self,
        notifications: &Notifications,
        context: &StatefulContext<'_>,
    ) -> ValidationResult {
        let mut result = ValidationResult::Success;

        for notification in notifications.iter() {
            if !notification.channel().includes_validators() {
                continue;
            }

            let Some(indexes) = self.stateful_index.get(&notification.notification_type()) else {
                continue;
            };

            for idx in indexes {
                let validator = &self.stateful[*idx];
                result = result.aggregate(validator.validate(notification, context));

                if let ValidationResult::Failure(code) = result {
                    trace!(validator = validator.name(), %code, "stateful validation failed");
                    return result;
                }
            }
        }

        result
    }

    /// Runs observers over a notification sequence
    ///
    /// In rollback mode both the notifications and the observers registered
    /// for each of them are visited in reverse.
    pub fn observe(
        &self,
        notifications: &Notifications,
        context: &mut ObserverContext<'_>,
    ) -> Result<(), ObserverError> {
        let ordered: Box<dyn Iterator<Item = _>> = match context.mode {
            NotifyMode::Commit => Box::new(notifications.iter()),
            NotifyMode::Rollback => Box::new(notifications.iter().rev()),
        };

        for notification in ordered {
            if !notification.channel().includes_observers() {
                continue;
            }

            let Some(indexes) = self.observer_index.get(&notification.notification_type()) else {
                continue;
            };

            let indexes: Box<dyn Iterator<Item = &usize>> = match context.mode {
                NotifyMode::Commit => Box::new(indexes.iter()),
                NotifyMode::Rollback => Box::new(indexes.iter().rev()),
            };

            for idx in indexes {
                self.observers[*idx].notify(notification, context)?;
            }
        }

        Ok(())
    }

    pub fn validate_entity_stateless(&self, info: &WeakEntityInfo<'_>) -> ValidationResult {
        match self.notifications_of(info) {
            Ok(notifications) => self.validate_stateless(&notifications),
            Err(failure) => failure,
        }
    }

    /// Stateless validation of many entities in parallel, results in input order
    #[instrument(skip_all, fields(entities = infos.len()))]
    pub fn validate_entities_stateless(&self, infos: &[WeakEntityInfo<'_>]) -> Vec<ValidationResult> {
        infos
            .par_iter()
            .map(|info| self.validate_entity_stateless(info))
            .collect()
    }

    pub fn validate_entity_stateful(
        &self,
        info: &WeakEntityInfo<'_>,
        context: &StatefulContext<'_>,
    ) -> ValidationResult {
        match self.notifications_of(info) {
            Ok(notifications) => self.validate_stateful(&notifications, context),
            Err(failure) => failure,
        }
    }

    /// Publishes and observes one entity
    ///
    /// Entities reaching observation already passed validation, so a
    /// publication error here is a broken invariant.
    pub fn observe_entity(
        &self,
        info: &WeakEntityInfo<'_>,
        context: &mut ObserverContext<'_>,
    ) -> Result<(), ObserverError> {
        let notifications = self.notifications_of(info).map_err(|failure| {
            ObserverError::Inconsistent(format!("entity {} not publishable: {failure}", info.hash()))
        })?;

        self.observe(&notifications, context)
    }

    /// Validates and observes one entity notification by notification
    ///
    /// Each notification is checked by the stateful validators against the
    /// state left by the notifications before it, then applied by the
    /// observers. Stops at the first failure, leaving earlier effects in the
    /// delta; callers discard the delta on failure.
    pub fn process_entity(
        &self,
        info: &WeakEntityInfo<'_>,
        context: &mut ObserverContext<'_>,
    ) -> Result<ValidationResult, ObserverError> {
        debug_assert!(context.is_commit(), "entities are only processed forward");

        let notifications = match self.notifications_of(info) {
            Ok(x) => x,
            Err(failure) => return Ok(failure),
        };

        let mut result = ValidationResult::Success;

        for notification in notifications.iter() {
            let notification_type = notification.notification_type();
            let channel = notification.channel();

            if channel.includes_validators() {
                let stateful = StatefulContext {
                    config: context.config,
                    height: context.height,
                    block_time: context.block_time,
                    cache: &*context.cache,
                };

                for idx in self.stateful_index.get(&notification_type).into_iter().flatten() {
                    let validator = &self.stateful[*idx];
                    result = result.aggregate(validator.validate(notification, &stateful));

                    if let ValidationResult::Failure(code) = result {
                        trace!(validator = validator.name(), %code, "stateful validation failed");
                        return Ok(result);
                    }
                }
            }

            if channel.includes_observers() {
                for idx in self.observer_index.get(&notification_type).into_iter().flatten() {
                    self.observers[*idx].notify(notification, context)?;
                }
            }
        }

        Ok(result)
    }
}
