//! FLAGS register bits.
//!
//! CMP clears FLAGS and then sets exactly one of these, so at most one bit
//! is ever set between comparisons.

/// Operands compared equal.
pub const FLAG_EQ: u64 = 0b001;

/// Destination was less than the operand (signed).
pub const FLAG_LT: u64 = 0b010;

/// Destination was greater than the operand (signed).
pub const FLAG_GT: u64 = 0b100;
