//! 提供者标识（Token）
//!
//! Token 是提供者在模块内的唯一键，支持三种形式：
//! - 字符串名称（按值比较）
//! - 符号（每次创建都唯一，按身份比较）
//! - 类型引用（按 `TypeId` 比较）

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// 唯一符号，描述仅用于调试输出
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    fn new(description: &str) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: Arc::from(description),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

/// 类型引用标识
#[derive(Clone, Copy)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// 类型的短名称（去掉模块路径），与类名的调试输出一致
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// 提供者标识
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// 字符串标识
    Name(Arc<str>),
    /// 唯一符号
    Symbol(Symbol),
    /// 类型引用
    Type(TypeToken),
}

impl Token {
    /// 字符串标识
    pub fn name(name: impl AsRef<str>) -> Self {
        Token::Name(Arc::from(name.as_ref()))
    }

    /// 创建一个新的唯一符号，即使描述相同也互不相等
    pub fn symbol(description: &str) -> Self {
        Token::Symbol(Symbol::new(description))
    }

    /// 以类型本身作为标识
    pub fn of<T: ?Sized + 'static>() -> Self {
        Token::Type(TypeToken::of::<T>())
    }

    /// 规范化：三种标识原样返回，可直接用作映射键
    pub fn normalize(token: impl Into<Token>) -> Self {
        token.into()
    }

    /// 其他任意值的后备路径：以其字符串表示作为名称
    pub fn from_display(value: &dyn fmt::Display) -> Self {
        Token::name(value.to_string())
    }

    /// 可读的调试名称
    pub fn debug_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(name) => f.write_str(name),
            Token::Symbol(symbol) => write!(f, "Symbol({})", symbol.description),
            Token::Type(ty) => f.write_str(ty.short_name()),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(name) => write!(f, "{name:?}"),
            Token::Symbol(symbol) => write!(f, "{symbol:?}"),
            Token::Type(ty) => write!(f, "{ty:?}"),
        }
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Token::name(name)
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Token::Name(Arc::from(name))
    }
}

impl From<&Token> for Token {
    fn from(token: &Token) -> Self {
        token.clone()
    }
}

impl From<TypeToken> for Token {
    fn from(ty: TypeToken) -> Self {
        Token::Type(ty)
    }
}
