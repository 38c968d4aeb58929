//! 记忆层：跨 Run 共享的记忆账本与目标状态表（JSON 文件持久化）

pub mod ledger;

pub use ledger::{
    GoalRecord, GoalStatus, LedgerDocument, LedgerStats, MemoryEntry, MemoryKind, MemoryLedger,
    MAX_ENTRIES,
};
