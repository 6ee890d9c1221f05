//! Token generation.

use crate::core::Token;

/// Mint a fresh slot token.
///
/// Requeue always goes through here, so a recovered task never shares a token
/// (and therefore never shares liveness bookkeeping) with its predecessor.
pub fn new_token() -> Token {
    Token::new(uuid::Uuid::new_v4().simple().to_string())
}
