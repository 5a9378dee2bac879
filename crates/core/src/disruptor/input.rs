use std::fmt::Display;

use serde::Serialize;

use crate::{
    BlockElement, BlockRange, Height, Key, TransactionElement, TransactionRange,
    ValidationResult,
};

/// Where an input entered the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum InputSource {
    #[default]
    Unknown,
    Local,
    RemotePull,
    RemotePush,
}

/// A batch of blocks or transactions flowing through the consumer stages
#[derive(Debug, Default)]
pub struct ConsumerInput {
    blocks: Vec<BlockElement>,
    transactions: Vec<TransactionElement>,
    source: InputSource,
    source_identity: Option<Key>,
}

impl ConsumerInput {
    pub fn from_blocks(range: BlockRange, source: InputSource) -> Self {
        Self {
            blocks: range.into_iter().map(BlockElement::new).collect(),
            source,
            ..Default::default()
        }
    }

    pub fn from_transactions(range: TransactionRange, source: InputSource) -> Self {
        Self {
            transactions: range.into_iter().map(TransactionElement::new).collect(),
            source,
            ..Default::default()
        }
    }

    /// Tags the input with the identity of the peer that supplied it
    pub fn with_identity(mut self, identity: Key) -> Self {
        self.source_identity = Some(identity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.transactions.is_empty()
    }

    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn has_transactions(&self) -> bool {
        !self.transactions.is_empty()
    }

    pub fn blocks(&self) -> &[BlockElement] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [BlockElement] {
        &mut self.blocks
    }

    pub fn transactions(&self) -> &[TransactionElement] {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut [TransactionElement] {
        &mut self.transactions
    }

    pub fn source(&self) -> InputSource {
        self.source
    }

    pub fn source_identity(&self) -> Option<&Key> {
        self.source_identity.as_ref()
    }

    fn height_span(&self) -> Option<(Height, Height)> {
        Some((self.blocks.first()?.height(), self.blocks.last()?.height()))
    }
}

impl Display for ConsumerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some((first, last)) = self.height_span() {
            write!(
                f,
                "{} blocks (heights {first} - {last}) [{:?}]",
                self.blocks.len(),
                self.source
            )
        } else if self.has_transactions() {
            write!(f, "{} txes [{:?}]", self.transactions.len(), self.source)
        } else {
            write!(f, "empty input [{:?}]", self.source)
        }
    }
}

/// Outcome of one consumer stage for one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerResult {
    /// Hand the element to the next stage
    Continue,

    /// Stop processing; remaining stages never see the element
    Abort {
        code: ValidationResult,

        /// Index of the offending entity within the input, if known
        element: Option<usize>,
    },

    /// The element was fully handled by this stage
    Consumed,
}

impl ConsumerResult {
    pub fn abort(code: ValidationResult) -> Self {
        Self::Abort {
            code,
            element: None,
        }
    }

    pub fn abort_at(code: ValidationResult, element: usize) -> Self {
        Self::Abort {
            code,
            element: Some(element),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionStatus {
    Normal,
    Aborted,
    Consumed,
}

/// Final outcome reported for a dispatched element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumerCompletionResult {
    pub status: CompletionStatus,
    pub code: ValidationResult,

    /// Index of the stage that stopped the element
    pub consumer: Option<usize>,

    /// Index of the rejected entity within the input
    pub element: Option<usize>,
}

impl ConsumerCompletionResult {
    pub fn normal() -> Self {
        Self {
            status: CompletionStatus::Normal,
            code: ValidationResult::Success,
            consumer: None,
            element: None,
        }
    }

    pub(crate) fn from_stage(consumer: usize, result: ConsumerResult) -> Option<Self> {
        match result {
            ConsumerResult::Continue => None,
            ConsumerResult::Abort { code, element } => Some(Self {
                status: CompletionStatus::Aborted,
                code,
                consumer: Some(consumer),
                element,
            }),
            ConsumerResult::Consumed => Some(Self {
                status: CompletionStatus::Consumed,
                code: ValidationResult::Success,
                consumer: Some(consumer),
                element: None,
            }),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.status == CompletionStatus::Aborted
    }
}
