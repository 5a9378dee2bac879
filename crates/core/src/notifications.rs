use std::{any::Any, fmt::Debug, fmt::Display};

use crate::{
    Address, Amount, Difficulty, EntityType, Hash256, Key, NetworkIdentifier, Signature,
    Timestamp,
};

/// Stable identity of a notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationType {
    pub facility: &'static str,
    pub code: u16,
    pub name: &'static str,
}

impl NotificationType {
    pub const fn new(facility: &'static str, code: u16, name: &'static str) -> Self {
        Self {
            facility,
            code,
            name,
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_Notification", self.facility, self.name)
    }
}

/// Which kind of handler a notification is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Validator,
    Observer,
    All,
}

impl NotificationChannel {
    pub fn includes_validators(self) -> bool {
        matches!(self, Self::Validator | Self::All)
    }

    pub fn includes_observers(self) -> bool {
        matches!(self, Self::Observer | Self::All)
    }
}

/// A typed fact extracted from an entity
pub trait Notification: Any + Debug + Send + Sync {
    const TYPE: NotificationType;
    const CHANNEL: NotificationChannel = NotificationChannel::All;
}

/// Object-safe view of a [`Notification`]
pub trait AnyNotification: Debug + Send + Sync {
    fn notification_type(&self) -> NotificationType;

    fn channel(&self) -> NotificationChannel;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Notification> AnyNotification for T {
    fn notification_type(&self) -> NotificationType {
        T::TYPE
    }

    fn channel(&self) -> NotificationChannel {
        T::CHANNEL
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ordered notifications published for a single entity
#[derive(Debug, Default)]
pub struct Notifications {
    items: Vec<Box<dyn AnyNotification>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<N: Notification>(&mut self, notification: N) {
        self.items.push(Box::new(notification));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &dyn AnyNotification> {
        self.items.iter().map(|x| &**x)
    }

    pub fn types(&self) -> Vec<NotificationType> {
        self.iter().map(|x| x.notification_type()).collect()
    }

    /// The first notification of type `N`, if any
    pub fn find<N: Notification>(&self) -> Option<&N> {
        self.iter().find_map(|x| x.as_any().downcast_ref::<N>())
    }
}

pub const CORE_FACILITY: &str = "Core";

macro_rules! core_notification {
    ($(#[$meta:meta])* $name:ident, $code:expr, $label:expr, $channel:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Notification for $name {
            const TYPE: NotificationType = NotificationType::new(CORE_FACILITY, $code, $label);
            const CHANNEL: NotificationChannel = NotificationChannel::$channel;
        }
    };
}

core_notification!(
    /// Envelope data shared by every entity
    EntityNotification, 0x0001, "Entity", Validator {
        network: NetworkIdentifier,
        entity_type: EntityType,
        version: u8,
    }
);

core_notification!(
    /// An account identified by public key is referenced
    AccountPublicKeyNotification, 0x0002, "Register_Account_Public_Key", All {
        public_key: Key,
    }
);

core_notification!(
    /// An account identified only by address is referenced
    AccountAddressNotification, 0x0003, "Register_Account_Address", All {
        address: Address,
    }
);

core_notification!(
    TransactionNotification, 0x0004, "Transaction", All {
        signer: Key,
        hash: Hash256,
        entity_type: EntityType,
        deadline: Timestamp,
    }
);

core_notification!(
    /// The sender must hold and give up `amount`
    BalanceDebitNotification, 0x0005, "Balance_Debit", All {
        sender: Key,
        amount: Amount,
    }
);

core_notification!(
    BalanceTransferNotification, 0x0006, "Balance_Transfer", All {
        sender: Key,
        recipient: Address,
        amount: Amount,
    }
);

core_notification!(
    SignatureNotification, 0x0007, "Signature", Validator {
        signer: Key,
        signature: Signature,
        data_hash: Hash256,
    }
);

core_notification!(
    BlockNotification, 0x0008, "Block", All {
        signer: Key,
        timestamp: Timestamp,
        difficulty: Difficulty,
        total_fee: Amount,
        num_transactions: u32,
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_keep_publication_order() {
        let mut sink = Notifications::new();
        sink.push(AccountPublicKeyNotification {
            public_key: Key([1; 32]),
        });
        sink.push(BalanceDebitNotification {
            sender: Key([1; 32]),
            amount: Amount(5),
        });

        assert_eq!(
            sink.types(),
            vec![
                AccountPublicKeyNotification::TYPE,
                BalanceDebitNotification::TYPE
            ]
        );

        let reversed: Vec<_> = sink.iter().rev().map(|x| x.notification_type()).collect();
        assert_eq!(reversed[0], BalanceDebitNotification::TYPE);
    }

    #[test]
    fn find_downcasts_to_concrete_type() {
        let mut sink = Notifications::new();
        sink.push(BalanceDebitNotification {
            sender: Key([2; 32]),
            amount: Amount(9),
        });

        let debit = sink.find::<BalanceDebitNotification>().unwrap();
        assert_eq!(debit.amount, Amount(9));
        assert!(sink.find::<BlockNotification>().is_none());
    }

    #[test]
    fn channels_route_to_expected_handler_kinds() {
        assert!(SignatureNotification::CHANNEL.includes_validators());
        assert!(!SignatureNotification::CHANNEL.includes_observers());
        assert!(BlockNotification::CHANNEL.includes_observers());
        assert_eq!(
            BalanceTransferNotification::TYPE.to_string(),
            "Core_Balance_Transfer_Notification"
        );
    }
}
