//! Balance transfers between accounts, with an optional message.

use ledgerflow_core::{
    check, encode_payload, AccountAddressNotification, Address, Amount,
    BalanceTransferNotification, EntityType, FailureCode, Notification, NotificationChannel,
    NotificationType, Notifications, PayloadError, PluginError, PluginManager,
    StatelessValidator, Transaction, TransactionPlugin,
};
use serde::{Deserialize, Serialize};

pub const TRANSFER_FACILITY: &str = "Transfer";

pub const TRANSFER_ENTITY_TYPE: EntityType = EntityType(0x4154);

pub const FAILURE_TRANSFER_MESSAGE_TOO_LARGE: FailureCode =
    FailureCode::new(TRANSFER_FACILITY, 0x0001, "Message_Too_Large");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    pub recipient: Address,
    pub amount: Amount,
    pub message: Vec<u8>,
}

impl TransferPayload {
    pub fn encode(&self) -> Vec<u8> {
        encode_payload(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessageNotification {
    pub size: usize,
}

impl Notification for TransferMessageNotification {
    const TYPE: NotificationType = NotificationType::new(TRANSFER_FACILITY, 0x0001, "Message");
    const CHANNEL: NotificationChannel = NotificationChannel::Validator;
}

pub struct TransferPlugin;

impl TransactionPlugin for TransferPlugin {
    fn entity_type(&self) -> EntityType {
        TRANSFER_ENTITY_TYPE
    }

    fn name(&self) -> &'static str {
        "Transfer"
    }

    fn publish(&self, tx: &Transaction, sink: &mut Notifications) -> Result<(), PayloadError> {
        let payload: TransferPayload = tx.decode_payload()?;

        sink.push(AccountAddressNotification {
            address: payload.recipient,
        });

        sink.push(BalanceTransferNotification {
            sender: tx.signer,
            recipient: payload.recipient,
            amount: payload.amount,
        });

        sink.push(TransferMessageNotification {
            size: payload.message.len(),
        });

        Ok(())
    }
}

pub fn create_transfer_message_validator() -> StatelessValidator {
    StatelessValidator::new(
        "TransferMessageValidator",
        |n: &TransferMessageNotification, context| {
            check(
                n.size <= context.config.max_message_size,
                FAILURE_TRANSFER_MESSAGE_TOO_LARGE,
            )
        },
    )
}

pub fn register_transfer_plugin(manager: &mut PluginManager) -> Result<(), PluginError> {
    manager.add_transaction_plugin(TransferPlugin)?;
    manager.add_stateless_validator(create_transfer_message_validator());

    Ok(())
}
