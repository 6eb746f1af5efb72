//! Tokens produced by the lexer and consumed by the shunting-yard pass and the tree builder.

use std::fmt;

/// Unary operators of the input grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Neg,
}

/// Binary operators of the input grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOperator {
    /// Binding strength, higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Add | BinaryOperator::Sub => 1,
            BinaryOperator::Mul | BinaryOperator::Div => 2,
            BinaryOperator::Pow => 3,
        }
    }

    pub fn is_left_assoc(self) -> bool {
        !matches!(self, BinaryOperator::Pow)
    }

    pub fn symbol(self) -> char {
        match self {
            BinaryOperator::Add => '+',
            BinaryOperator::Sub => '-',
            BinaryOperator::Mul => '*',
            BinaryOperator::Div => '/',
            BinaryOperator::Pow => '^',
        }
    }
}

/// Named functions recognised by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Abs,
    Sgn,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Pow,
    Derivative,
    Subs,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 20] = [
        FunctionKind::Abs,
        FunctionKind::Sgn,
        FunctionKind::Sqrt,
        FunctionKind::Exp,
        FunctionKind::Log,
        FunctionKind::Sin,
        FunctionKind::Cos,
        FunctionKind::Tan,
        FunctionKind::Asin,
        FunctionKind::Acos,
        FunctionKind::Atan,
        FunctionKind::Sinh,
        FunctionKind::Cosh,
        FunctionKind::Tanh,
        FunctionKind::Asinh,
        FunctionKind::Acosh,
        FunctionKind::Atanh,
        FunctionKind::Pow,
        FunctionKind::Derivative,
        FunctionKind::Subs,
    ];

    /// Looks up a function by its lowercase name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionKind::Abs => "abs",
            FunctionKind::Sgn => "sgn",
            FunctionKind::Sqrt => "sqrt",
            FunctionKind::Exp => "exp",
            FunctionKind::Log => "log",
            FunctionKind::Sin => "sin",
            FunctionKind::Cos => "cos",
            FunctionKind::Tan => "tan",
            FunctionKind::Asin => "asin",
            FunctionKind::Acos => "acos",
            FunctionKind::Atan => "atan",
            FunctionKind::Sinh => "sinh",
            FunctionKind::Cosh => "cosh",
            FunctionKind::Tanh => "tanh",
            FunctionKind::Asinh => "asinh",
            FunctionKind::Acosh => "acosh",
            FunctionKind::Atanh => "atanh",
            FunctionKind::Pow => "pow",
            FunctionKind::Derivative => "derivative",
            FunctionKind::Subs => "subs",
        }
    }

    /// Declared number of arguments. `None` for variadic functions (`subs`).
    pub fn arity(self) -> Option<usize> {
        match self {
            FunctionKind::Pow | FunctionKind::Derivative => Some(2),
            FunctionKind::Subs => None,
            _ => Some(1),
        }
    }

    /// Checks a counted argument list against the declared arity.
    ///
    /// `subs` takes an expression followed by variable/value pairs, so any odd count of at
    /// least three is accepted.
    pub fn accepts(self, count: usize) -> bool {
        match self.arity() {
            Some(n) => n == count,
            None => count >= 3 && count % 2 == 1,
        }
    }

    /// Human readable arity, used in error messages.
    pub fn arity_description(self) -> String {
        match self.arity() {
            Some(n) => n.to_string(),
            None => "an odd number (at least 3) of".to_string(),
        }
    }
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Zero,
    Unity,
    NegUnity,
    NaN,
    Number(String),
    Variable(String),
    UnaryOperator(UnaryOperator),
    BinaryOperator(BinaryOperator),
    /// Function name and the number of arguments found by the shunting-yard pass.
    /// The lexer emits the declared arity, or 0 for variadic functions.
    Function(FunctionKind, usize),
    LeftParen,
    RightParen,
    Comma,
}

/// Key of the creation map: one entry per kind of token that produces a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenId {
    Zero,
    Unity,
    NegUnity,
    NaN,
    Number,
    Variable,
    Unary(UnaryOperator),
    Binary(BinaryOperator),
    Function(FunctionKind),
}

impl Token {
    /// The creation map key, `None` for punctuation.
    pub fn id(&self) -> Option<TokenId> {
        match self {
            Token::Zero => Some(TokenId::Zero),
            Token::Unity => Some(TokenId::Unity),
            Token::NegUnity => Some(TokenId::NegUnity),
            Token::NaN => Some(TokenId::NaN),
            Token::Number(_) => Some(TokenId::Number),
            Token::Variable(_) => Some(TokenId::Variable),
            Token::UnaryOperator(op) => Some(TokenId::Unary(*op)),
            Token::BinaryOperator(op) => Some(TokenId::Binary(*op)),
            Token::Function(kind, _) => Some(TokenId::Function(*kind)),
            Token::LeftParen | Token::RightParen | Token::Comma => None,
        }
    }

    /// Whether the token ends an operand, after which `-` is binary.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Zero
                | Token::Unity
                | Token::NegUnity
                | Token::NaN
                | Token::Number(_)
                | Token::Variable(_)
                | Token::RightParen
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Zero => write!(f, "0"),
            Token::Unity => write!(f, "1"),
            Token::NegUnity => write!(f, "-1"),
            Token::NaN => write!(f, "nan"),
            Token::Number(text) => write!(f, "{}", text),
            Token::Variable(name) => write!(f, "{}", name),
            Token::UnaryOperator(UnaryOperator::Neg) => write!(f, "neg"),
            Token::BinaryOperator(op) => write!(f, "{}", op.symbol()),
            Token::Function(kind, arity) => write!(f, "{}/{}", kind.name(), arity),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}
