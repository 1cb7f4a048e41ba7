/// Build an `AttributeMap` from `column => value` pairs.
///
/// Values go through `Value::from`, so `Option<T>` maps `None` to `Null`.
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::AttributeMap::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::AttributeMap::new();
        $(
            map.insert(::std::string::String::from($column), $crate::Value::from($value));
        )+
        map
    }};
}

/// Insert `column => value` into `map` only when `value` is `Some`.
#[macro_export]
macro_rules! set_if_some {
    ($map:expr, $($column:expr => $value:expr),+ $(,)?) => {
        $(
            if let Some(v) = $value {
                $map.insert(::std::string::String::from($column), $crate::Value::from(v));
            }
        )+
    };
}
