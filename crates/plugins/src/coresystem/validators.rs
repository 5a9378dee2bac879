use ledgerflow_core::{
    check, AccountAddressNotification, Amount, BalanceDebitNotification,
    BalanceTransferNotification, BlockNotification, EntityNotification, FailureCode, Height, Key,
    SignatureNotification, StatefulContext, StatefulValidator,
    StatelessValidator, Timestamp, TransactionNotification, ValidationResult, CORE_FACILITY,
};

use super::{find_account, AccountStateCache};

pub const FAILURE_CORE_WRONG_NETWORK: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0001, "Wrong_Network");

pub const FAILURE_CORE_INVALID_ADDRESS: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0002, "Invalid_Address");

pub const FAILURE_CORE_TOO_MANY_TRANSACTIONS: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0003, "Too_Many_Transactions");

pub const FAILURE_CORE_PAST_DEADLINE: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0004, "Past_Deadline");

pub const FAILURE_CORE_FUTURE_DEADLINE: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0005, "Future_Deadline");

pub const FAILURE_CORE_NEMESIS_ACCOUNT_SIGNED_AFTER_NEMESIS_BLOCK: FailureCode = FailureCode::new(
    CORE_FACILITY,
    0x0006,
    "Nemesis_Account_Signed_After_Nemesis_Block",
);

pub const FAILURE_CORE_BLOCK_HARVESTER_INELIGIBLE: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0007, "Block_Harvester_Ineligible");

pub const FAILURE_CORE_INSUFFICIENT_BALANCE: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0008, "Insufficient_Balance");

pub fn create_max_transactions_validator() -> StatelessValidator {
    StatelessValidator::new(
        "MaxTransactionsValidator",
        |n: &BlockNotification, context| {
            check(
                n.num_transactions <= context.config.max_transactions_per_block,
                FAILURE_CORE_TOO_MANY_TRANSACTIONS,
            )
        },
    )
}

pub fn create_address_validator() -> StatelessValidator {
    StatelessValidator::new(
        "AddressValidator",
        |n: &AccountAddressNotification, context| {
            check(
                n.address.is_valid_for(context.config.network),
                FAILURE_CORE_INVALID_ADDRESS,
            )
        },
    )
}

pub fn create_network_validator() -> StatelessValidator {
    StatelessValidator::new("NetworkValidator", |n: &EntityNotification, context| {
        check(
            n.network == context.config.network,
            FAILURE_CORE_WRONG_NETWORK,
        )
    })
}

/// Deadlines must fall within `[block_time, block_time + max_transaction_lifetime]`
pub fn create_deadline_validator() -> StatefulValidator {
    StatefulValidator::new(
        "DeadlineValidator",
        |n: &TransactionNotification, context| {
            if n.deadline < context.block_time {
                return FAILURE_CORE_PAST_DEADLINE.into();
            }

            let limit = context
                .block_time
                .get()
                .saturating_add(context.config.max_transaction_lifetime);

            check(n.deadline <= Timestamp(limit), FAILURE_CORE_FUTURE_DEADLINE)
        },
    )
}

/// The nemesis account may only sign the nemesis block
pub fn create_nemesis_sink_validator() -> StatefulValidator {
    StatefulValidator::new(
        "NemesisSinkValidator",
        |n: &SignatureNotification, context| {
            let is_nemesis = n.signer == context.config.nemesis_public_key;

            check(
                !is_nemesis || context.height == Height(1),
                FAILURE_CORE_NEMESIS_ACCOUNT_SIGNED_AFTER_NEMESIS_BLOCK,
            )
        },
    )
}

pub fn create_eligible_harvester_validator() -> StatefulValidator {
    StatefulValidator::new(
        "EligibleHarvesterValidator",
        |n: &BlockNotification, context| {
            let balance = signer_balance(&n.signer, context);

            check(
                balance >= context.config.min_harvester_balance,
                FAILURE_CORE_BLOCK_HARVESTER_INELIGIBLE,
            )
        },
    )
}

pub fn create_balance_reserve_validator() -> StatefulValidator {
    StatefulValidator::new(
        "BalanceReserveValidator",
        |n: &BalanceDebitNotification, context| has_balance(&n.sender, n.amount, context),
    )
}

pub fn create_balance_transfer_validator() -> StatefulValidator {
    StatefulValidator::new(
        "BalanceTransferValidator",
        |n: &BalanceTransferNotification, context| has_balance(&n.sender, n.amount, context),
    )
}

fn signer_balance(signer: &Key, context: &StatefulContext<'_>) -> Amount {
    context
        .cache
        .sub::<AccountStateCache>()
        .ok()
        .and_then(|accounts| find_account(accounts, signer, context.config.network))
        .map(|x| x.balance)
        .unwrap_or_default()
}

fn has_balance(sender: &Key, amount: Amount, context: &StatefulContext<'_>) -> ValidationResult {
    if amount == Amount(0) {
        return ValidationResult::Success;
    }

    check(
        signer_balance(sender, context) >= amount,
        FAILURE_CORE_INSUFFICIENT_BALANCE,
    )
}
