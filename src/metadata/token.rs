use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token referencing a row of one of the module tables.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the 1-based row within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Table id of `TypeRef` rows (imported types)
    pub const TYPE_REF: u8 = 0x01;
    /// Table id of `TypeDef` rows (types defined in the module)
    pub const TYPE_DEF: u8 = 0x02;
    /// Table id of `MethodDef` rows (methods defined in the module)
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of `MemberRef` rows (imported members)
    pub const MEMBER_REF: u8 = 0x0A;
    /// Table id of `TypeSpec` rows (constructed types such as arrays)
    pub const TYPE_SPEC: u8 = 0x1B;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a 1-based row
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token points into `table`
    #[must_use]
    pub fn is_table(&self, table: u8) -> bool {
        self.table() == table
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(Token::METHOD_DEF, 7);
        assert_eq!(token.value(), 0x06000007);
        assert_eq!(token.table(), Token::METHOD_DEF);
        assert_eq!(token.row(), 7);
        assert!(token.is_table(Token::METHOD_DEF));
        assert!(!token.is_table(Token::MEMBER_REF));
    }

    #[test]
    fn test_token_row_is_masked() {
        let token = Token::from_parts(Token::TYPE_REF, 0x0100_0002);
        assert_eq!(token.table(), Token::TYPE_REF);
        assert_eq!(token.row(), 2);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token::from_parts(Token::TYPE_DEF, 1).is_null());
    }

    #[test]
    fn test_token_formatting() {
        let token = Token(0x0A000003);
        assert_eq!(format!("{}", token), "0x0a000003");
        assert_eq!(
            format!("{:?}", token),
            "Token(0x0a000003, table: 0x0a, row: 3)"
        );
    }
}
