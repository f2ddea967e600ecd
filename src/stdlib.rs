//! The fixed builtin library. Builtins are looked up by exact name before
//! user functions, and a call with the wrong number or kind of arguments
//! quietly produces `None` (or the documented fallback).

use std::io::Write;

use crate::{
    diagnostics::Result,
    streams::Streams,
    value::{PyStr, Value},
};

/// `range` stops adding numbers once its text reaches this length.
pub const RANGE_TEXT_LIMIT: usize = 492;

pub type BuiltinFn = fn(&mut Streams, &[Value]) -> Result<Value>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    callback: BuiltinFn,
}

impl Builtin {
    pub fn call(&self, streams: &mut Streams, args: &[Value]) -> Result<Value> {
        (self.callback)(streams, args)
    }
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

const fn native(name: &'static str, callback: BuiltinFn) -> Builtin {
    Builtin { name, callback }
}

const BUILTINS: &[Builtin] = &[
    native("print", io_print),
    native("input", io_input),
    native("len", collections_len),
    native("str", convert_str),
    native("int", convert_int),
    native("abs", math_abs),
    native("max", math_max),
    native("min", math_min),
    native("range", collections_range),
    native("type", convert_type),
    native("pow", math_pow),
    native("sum", math_sum),
    native("join", string_join),
    native("split", string_split),
    native("substr", string_substr),
    native("find", string_find),
    native("startswith", string_starts_with),
    native("endswith", string_ends_with),
    native("tolower", string_to_lower),
    native("toupper", string_to_upper),
    native("ord", string_ord),
    native("chr", string_chr),
    native("slice", collections_slice),
    native("push", collections_push),
    native("concat", collections_concat),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

/// Integer power by repeated squaring; negative exponents give 0.
pub fn ipow(mut base: i64, mut exp: i64) -> i64 {
    if exp < 0 {
        return 0;
    }
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn single(args: &[Value]) -> Option<&Value> {
    match args {
        [value] => Some(value),
        _ => None,
    }
}

fn pair(args: &[Value]) -> Option<(&Value, &Value)> {
    match args {
        [a, b] => Some((a, b)),
        _ => None,
    }
}

fn str_bytes(value: &Value) -> Option<&[u8]> {
    value.as_str().map(PyStr::as_bytes)
}

fn io_print(streams: &mut Streams, args: &[Value]) -> Result<Value> {
    let mut line = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            line.push(b' ');
        }
        arg.render_into(&mut line, false);
    }
    line.push(b'\n');
    streams.out.write_all(&line)?;
    Ok(Value::None)
}

fn io_input(streams: &mut Streams, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Str(prompt)) => streams.out.write_all(prompt.as_bytes())?,
        Some(Value::Int(n)) => write!(streams.out, "{n}")?,
        _ => {}
    }
    streams.out.flush()?;
    let line = streams.read_line()?.unwrap_or_default();
    Ok(Value::str(line))
}

fn collections_len(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let len = match single(args) {
        Some(Value::Str(s)) => s.len(),
        Some(Value::List(items)) => items.borrow().len(),
        _ => return Ok(Value::None),
    };
    Ok(Value::Int(len as i64))
}

fn convert_str(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args) {
        Some(Value::Int(n)) => Value::str(n.to_string()),
        Some(value @ Value::Str(_)) => value.clone(),
        Some(_) => Value::str("None"),
        None => Value::None,
    })
}

fn convert_int(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args) {
        Some(Value::Int(n)) => Value::Int(*n),
        Some(Value::Str(s)) => Value::Int(parse_int(s.as_bytes())),
        Some(_) => Value::Int(0),
        None => Value::None,
    })
}

/// Leading whitespace, an optional sign and decimal digits, saturating at
/// the i64 bounds. Anything other than whitespace after the digits makes
/// the whole conversion 0.
fn parse_int(text: &[u8]) -> i64 {
    let is_space = |b: u8| b.is_ascii_whitespace() || b == 0x0b;
    let mut pos = text.iter().take_while(|&&b| is_space(b)).count();
    let negative = match text.get(pos) {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };
    let digits = text[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return 0;
    }
    let limit = i128::from(i64::MAX) + 1;
    let magnitude = text[pos..pos + digits].iter().fold(0i128, |acc, digit| {
        (acc * 10 + i128::from(digit - b'0')).min(limit)
    });
    match text.get(pos + digits) {
        Some(&b) if !is_space(b) => return 0,
        _ => {}
    }
    let signed = if negative { -magnitude } else { magnitude };
    signed.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

fn convert_type(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let name = single(args).map_or("none", Value::type_name);
    Ok(Value::str(name))
}

fn math_abs(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args) {
        Some(Value::Int(n)) => Value::Int(n.wrapping_abs()),
        _ => Value::None,
    })
}

fn math_extreme(args: &[Value], prefer: fn(i64, i64) -> bool) -> Value {
    let Some((Value::Int(first), rest)) = args.split_first() else {
        return Value::None;
    };
    let best = rest
        .iter()
        .filter_map(Value::as_int)
        .fold(*first, |best, n| if prefer(n, best) { n } else { best });
    Value::Int(best)
}

fn math_max(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(math_extreme(args, |n, best| n > best))
}

fn math_min(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(math_extreme(args, |n, best| n < best))
}

fn math_pow(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match pair(args) {
        Some((Value::Int(base), Value::Int(exp))) => Value::Int(ipow(*base, *exp)),
        _ => Value::None,
    })
}

fn math_sum(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let total = match args {
        [Value::List(items)] => items
            .borrow()
            .iter()
            .filter_map(Value::as_int)
            .fold(0i64, i64::wrapping_add),
        _ => args
            .iter()
            .filter_map(Value::as_int)
            .fold(0i64, i64::wrapping_add),
    };
    Ok(Value::Int(total))
}

/// The textual form `"a, b, c"` of an arithmetic sequence.
fn collections_range(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let bounds: Option<Vec<i64>> = args.iter().map(Value::as_int).collect();
    let (start, stop, step) = match bounds.as_deref() {
        Some(&[stop]) => (0, stop, 1),
        Some(&[start, stop]) => (start, stop, 1),
        Some(&[start, stop, step]) => (start, stop, step),
        _ => return Ok(Value::None),
    };
    let mut text = String::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        if !text.is_empty() {
            text.push_str(", ");
        }
        text.push_str(&current.to_string());
        if text.len() >= RANGE_TEXT_LIMIT {
            break;
        }
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::str(text))
}

fn string_join(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let Some((sep, list)) = pair(args) else {
        return Ok(Value::None);
    };
    let sep = str_bytes(sep).unwrap_or_default();
    let Some(items) = list.as_list() else {
        return Ok(Value::None);
    };
    let items = items.borrow();
    let mut joined = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            joined.extend_from_slice(sep);
        }
        joined.extend_from_slice(str_bytes(item).unwrap_or_default());
    }
    Ok(Value::str(joined))
}

fn string_split(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let (text, sep) = match args {
        [text] => (text, None),
        [text, sep] => (text, Some(sep)),
        _ => return Ok(Value::None),
    };
    let Some(mut rest) = str_bytes(text) else {
        return Ok(Value::None);
    };
    let sep = match sep.and_then(str_bytes) {
        Some(sep) if !sep.is_empty() => sep,
        _ => b" ".as_slice(),
    };
    let mut pieces = Vec::new();
    while !rest.is_empty() {
        match find_bytes(rest, sep) {
            Some(idx) => {
                pieces.push(Value::str(&rest[..idx]));
                rest = &rest[idx + sep.len()..];
            }
            None => {
                pieces.push(Value::str(rest));
                break;
            }
        }
    }
    Ok(Value::list(pieces))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn string_substr(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let [Value::Str(text), Value::Int(start), Value::Int(len)] = args else {
        return Ok(Value::None);
    };
    let bytes = text.as_bytes();
    let total = bytes.len() as i64;
    let start = (*start).clamp(0, total);
    let len = (*len).clamp(0, total - start);
    Ok(Value::str(&bytes[start as usize..(start + len) as usize]))
}

fn string_find(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let Some((text, needle)) = pair(args) else {
        return Ok(Value::None);
    };
    let index = match (str_bytes(text), str_bytes(needle)) {
        (Some(text), Some(needle)) => find_bytes(text, needle).map_or(-1, |idx| idx as i64),
        _ => -1,
    };
    Ok(Value::Int(index))
}

fn string_affix(args: &[Value], test: fn(&[u8], &[u8]) -> bool) -> Value {
    let Some((text, affix)) = pair(args) else {
        return Value::None;
    };
    match (str_bytes(text), str_bytes(affix)) {
        (Some(text), Some(affix)) => Value::bool(test(text, affix)),
        _ => Value::Int(0),
    }
}

fn string_starts_with(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(string_affix(args, <[u8]>::starts_with))
}

fn string_ends_with(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(string_affix(args, <[u8]>::ends_with))
}

fn string_to_lower(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args).and_then(str_bytes) {
        Some(text) => Value::str(text.to_ascii_lowercase()),
        None => Value::None,
    })
}

fn string_to_upper(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args).and_then(str_bytes) {
        Some(text) => Value::str(text.to_ascii_uppercase()),
        None => Value::None,
    })
}

fn string_ord(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let Some(value) = single(args) else {
        return Ok(Value::None);
    };
    let code = str_bytes(value)
        .and_then(|text| text.first())
        .map_or(0, |&b| i64::from(b));
    Ok(Value::Int(code))
}

fn string_chr(_: &mut Streams, args: &[Value]) -> Result<Value> {
    Ok(match single(args) {
        Some(Value::Int(code)) => Value::str(vec![(code & 0xff) as u8]),
        _ => Value::None,
    })
}

fn collections_slice(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let [Value::List(items), Value::Int(start), Value::Int(end)] = args else {
        return Ok(Value::None);
    };
    let items = items.borrow();
    let len = items.len() as i64;
    let wrap = |idx: i64| if idx < 0 { idx + len } else { idx };
    let start = wrap(*start).clamp(0, len);
    let end = wrap(*end).clamp(0, len).max(start);
    Ok(Value::list(items[start as usize..end as usize].to_vec()))
}

fn collections_push(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let Some((Value::List(items), item)) = pair(args) else {
        return Ok(Value::None);
    };
    let mut copy = items.borrow().clone();
    copy.push(item.clone());
    Ok(Value::list(copy))
}

fn collections_concat(_: &mut Streams, args: &[Value]) -> Result<Value> {
    let Some((Value::List(first), Value::List(second))) = pair(args) else {
        return Ok(Value::None);
    };
    let mut joined = first.borrow().clone();
    joined.extend(second.borrow().iter().cloned());
    Ok(Value::list(joined))
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        let mut streams = Streams::new(io::sink(), io::sink(), io::empty());
        lookup(name)
            .unwrap_or_else(|| panic!("{name} is a builtin"))
            .call(&mut streams, args)
            .expect("builtin call succeeds")
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn int_parsing_follows_strtoll_rules() {
        assert_eq!(parse_int(b"  42"), 42);
        assert_eq!(parse_int(b"-17 trailing"), -17);
        assert_eq!(parse_int(b"+5"), 5);
        assert_eq!(parse_int(b"12abc"), 0);
        assert_eq!(parse_int(b"abc"), 0);
        assert_eq!(parse_int(b"99999999999999999999"), i64::MAX);
        assert_eq!(parse_int(b"-99999999999999999999"), i64::MIN);
    }

    #[test]
    fn ipow_handles_edges() {
        assert_eq!(ipow(2, 10), 1024);
        assert_eq!(ipow(7, 0), 1);
        assert_eq!(ipow(2, -1), 0);
        assert_eq!(ipow(-3, 3), -27);
    }

    #[test]
    fn range_renders_sequences_as_text() {
        assert_eq!(call("range", &[Value::Int(4)]), Value::str("0, 1, 2, 3"));
        assert_eq!(
            call("range", &[Value::Int(10), Value::Int(0), Value::Int(-3)]),
            Value::str("10, 7, 4, 1")
        );
        assert_eq!(
            call("range", &[Value::Int(0), Value::Int(5), Value::Int(0)]),
            Value::str("")
        );
        assert_eq!(call("range", &[Value::str("3")]), Value::None);
        let long = call("range", &[Value::Int(100_000)]);
        let len = long.as_str().map(PyStr::len).unwrap_or_default();
        assert!((RANGE_TEXT_LIMIT..RANGE_TEXT_LIMIT + 8).contains(&len));
    }

    #[test]
    fn min_max_require_an_int_first() {
        let args = [Value::Int(3), Value::str("x"), Value::Int(9), Value::Int(-2)];
        assert_eq!(call("max", &args), Value::Int(9));
        assert_eq!(call("min", &args), Value::Int(-2));
        assert_eq!(call("max", &[Value::str("x"), Value::Int(1)]), Value::None);
        assert_eq!(call("max", &[]), Value::None);
    }

    #[test]
    fn sum_accepts_a_list_or_ints() {
        assert_eq!(call("sum", &[ints(&[1, 2, 3])]), Value::Int(6));
        assert_eq!(call("sum", &[Value::Int(4), Value::str("x"), Value::Int(5)]), Value::Int(9));
        assert_eq!(call("sum", &[]), Value::Int(0));
    }

    #[test]
    fn split_drops_only_the_trailing_piece() {
        let pieces = call("split", &[Value::str("a,,b,"), Value::str(",")]);
        assert_eq!(
            pieces,
            Value::list(vec![Value::str("a"), Value::str(""), Value::str("b")])
        );
        assert_eq!(call("split", &[Value::str("")]), Value::list(vec![]));
        assert_eq!(
            call("split", &[Value::str("x y"), Value::str("")]),
            Value::list(vec![Value::str("x"), Value::str("y")])
        );
    }

    #[test]
    fn join_treats_non_strings_as_empty() {
        let items = Value::list(vec![Value::str("a"), Value::Int(1), Value::str("b")]);
        assert_eq!(call("join", &[Value::str("-"), items.clone()]), Value::str("a--b"));
        assert_eq!(call("join", &[Value::None, items]), Value::str("ab"));
        assert_eq!(call("join", &[Value::str(","), Value::str("ab")]), Value::None);
    }

    #[test]
    fn string_helpers() {
        let hello = Value::str("Hello");
        assert_eq!(
            call("substr", &[hello.clone(), Value::Int(1), Value::Int(3)]),
            Value::str("ell")
        );
        assert_eq!(call("substr", &[hello.clone(), Value::Int(-4), Value::Int(99)]), hello);
        assert_eq!(call("find", &[hello.clone(), Value::str("lo")]), Value::Int(3));
        assert_eq!(call("find", &[hello.clone(), Value::str("z")]), Value::Int(-1));
        assert_eq!(call("find", &[Value::Int(1), Value::str("z")]), Value::Int(-1));
        assert_eq!(call("startswith", &[hello.clone(), Value::str("He")]), Value::Int(1));
        assert_eq!(call("endswith", &[hello.clone(), Value::str("xlo")]), Value::Int(0));
        assert_eq!(call("endswith", &[Value::None, Value::str("o")]), Value::Int(0));
        assert_eq!(call("toupper", &[hello.clone()]), Value::str("HELLO"));
        assert_eq!(call("tolower", &[hello.clone()]), Value::str("hello"));
        assert_eq!(call("ord", &[hello]), Value::Int(72));
        assert_eq!(call("ord", &[Value::str("")]), Value::Int(0));
        assert_eq!(call("chr", &[Value::Int(65 + 256)]), Value::str("A"));
        assert_eq!(call("chr", &[Value::str("A")]), Value::None);
    }

    #[test]
    fn conversions() {
        assert_eq!(call("str", &[Value::Int(-12)]), Value::str("-12"));
        assert_eq!(call("str", &[ints(&[1])]), Value::str("None"));
        assert_eq!(call("int", &[Value::str(" 31 ")]), Value::Int(31));
        assert_eq!(call("int", &[Value::None]), Value::Int(0));
        assert_eq!(call("type", &[ints(&[])]), Value::str("list"));
        assert_eq!(call("type", &[]), Value::str("none"));
        assert_eq!(call("len", &[Value::str("abc")]), Value::Int(3));
        assert_eq!(call("len", &[Value::Int(3)]), Value::None);
        assert_eq!(call("abs", &[Value::Int(-8)]), Value::Int(8));
    }

    #[test]
    fn list_helpers_build_fresh_lists() {
        let source = ints(&[1, 2, 3, 4, 5]);
        assert_eq!(
            call("slice", &[source.clone(), Value::Int(-2), Value::Int(100)]),
            ints(&[4, 5])
        );
        assert_eq!(call("slice", &[source.clone(), Value::Int(3), Value::Int(1)]), ints(&[]));
        let pushed = call("push", &[source.clone(), Value::Int(6)]);
        assert!(!pushed.same_list(&source));
        assert_eq!(source.list_snapshot().map(|items| items.len()), Some(5));
        assert_eq!(call("concat", &[ints(&[1]), ints(&[2])]), ints(&[1, 2]));
        assert_eq!(call("concat", &[ints(&[1]), Value::Int(2)]), Value::None);
    }

    #[test]
    fn input_prompts_and_reads_a_line() {
        let out = crate::streams::SharedBuffer::new();
        let input = io::Cursor::new(b"abc\r\n".to_vec());
        let mut streams = Streams::new(out.clone(), io::sink(), input);
        let line = lookup("input")
            .expect("input builtin")
            .call(&mut streams, &[Value::str("name? ")])
            .expect("reads");
        assert_eq!(line, Value::str("abc"));
        assert_eq!(out.contents(), "name? ");
        let eof = lookup("input").expect("input builtin").call(&mut streams, &[]).expect("reads");
        assert_eq!(eof, Value::str(""));
    }
}
