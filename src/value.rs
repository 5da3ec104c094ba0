//! 列值（运行时表示），在 pack 与调用方之间搬运类型化数据

/// 同一时刻只有一个变体有效；`Null` 即 SQL NULL
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i64),
    Real(f64),
    /// 自有字节串
    Str(Vec<u8>),
    /// 借用 pack 缓冲区的字节串视图
    StrView(&'a [u8]),
}

impl<'a> Value<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self { Self::Int(v) => Some(*v), _ => None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Int(v)  => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(b)     => Some(b),
            Self::StrView(b) => Some(b),
            _ => None,
        }
    }

    /// 字符串视图转为自有值，脱离 pack 的生命周期
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Self::Null       => Value::Null,
            Self::Int(v)     => Value::Int(v),
            Self::Real(v)    => Value::Real(v),
            Self::Str(b)     => Value::Str(b),
            Self::StrView(b) => Value::Str(b.to_vec()),
        }
    }

    /// 值的类型名，用于错误信息
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null       => "null",
            Self::Int(_)     => "int",
            Self::Real(_)    => "real",
            Self::Str(_)     => "str",
            Self::StrView(_) => "str-view",
        }
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<f64> for Value<'_> {
    fn from(v: f64) -> Self { Self::Real(v) }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(v: &'a [u8]) -> Self { Self::StrView(v) }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self { Self::StrView(v.as_bytes()) }
}

impl<T: Into<Value<'static>>> From<Option<T>> for Value<'static> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl std::fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "NULL"),
            Self::Int(v)     => write!(f, "{v}"),
            Self::Real(v)    => write!(f, "{v}"),
            Self::Str(b)     => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::StrView(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_and_owned_strings_expose_same_bytes() {
        let owned = {
            let buf = b"pack".to_vec();
            let view = Value::from(&buf[..]);
            assert_eq!(view.as_bytes(), Some(&b"pack"[..]));
            view.into_owned()
        };
        assert_eq!(owned, Value::Str(b"pack".to_vec()));
        assert_eq!(owned.to_string(), "pack");
    }

    #[test]
    fn options_map_to_null() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some(7i64)).as_i64(), Some(7));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Real(1.5).as_i64(), None);
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
