use crate::error::{BlockError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, recognize};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, tuple};
use nom::IResult;
use std::fmt;
use std::str::FromStr;

/// Content identity of a pooled DEX record.
///
/// Keys only hold text, never indices, so a key computed before a sort or merge still
/// names the same record afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    String(String),
    Type(String),
    TypeList(Vec<String>),
    Proto(ProtoKey),
    Field(FieldKey),
    Method(MethodKey),
    /// A class definition, by descriptor.
    Class(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoKey {
    pub return_type: String,
    pub params: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub class: String,
    pub name: String,
    pub field_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub class: String,
    pub name: String,
    pub proto: ProtoKey,
}

impl Key {
    /// Type tag of the section that pools records with this kind of key.
    pub fn section(&self) -> u16 {
        use crate::dex::section_type::tag as section;
        match self {
            Key::String(_) => section::STRING_ID,
            Key::Type(_) => section::TYPE_ID,
            Key::TypeList(_) => section::TYPE_LIST,
            Key::Proto(_) => section::PROTO_ID,
            Key::Field(_) => section::FIELD_ID,
            Key::Method(_) => section::METHOD_ID,
            Key::Class(_) => section::CLASS_ID,
        }
    }
}

impl ProtoKey {
    pub fn new(return_type: &str, params: &[&str]) -> Self {
        ProtoKey { return_type: return_type.to_string(), params: params.iter().map(|p| p.to_string()).collect() }
    }

    /// The shorty form: one character per type, references collapse to `L`.
    pub fn shorty(&self) -> String {
        std::iter::once(&self.return_type)
            .chain(self.params.iter())
            .map(|t| match t.chars().next() {
                Some('[') | Some('L') | None => 'L',
                Some(c) => c,
            })
            .collect()
    }
}

impl FieldKey {
    pub fn new(class: &str, name: &str, field_type: &str) -> Self {
        FieldKey { class: class.to_string(), name: name.to_string(), field_type: field_type.to_string() }
    }
}

impl MethodKey {
    pub fn new(class: &str, name: &str, proto: ProtoKey) -> Self {
        MethodKey { class: class.to_string(), name: name.to_string(), proto }
    }
}

impl fmt::Display for ProtoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.params.concat(), self.return_type)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.class, self.name, self.field_type)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.class, self.name, self.proto)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::String(s) | Key::Type(s) | Key::Class(s) => write!(f, "{s}"),
            Key::TypeList(types) => write!(f, "({})", types.concat()),
            Key::Proto(p) => write!(f, "{p}"),
            Key::Field(k) => write!(f, "{k}"),
            Key::Method(k) => write!(f, "{k}"),
        }
    }
}

fn descriptor(input: &str) -> IResult<&str, &str> {
    let object = recognize(tuple((char('L'), take_while1(|c| c != ';' && c != '(' && c != ')'), char(';'))));
    recognize(pair(many0_count(char('[')), alt((recognize(one_of("ZBCSIJFDV")), object))))(input)
}

fn proto(input: &str) -> IResult<&str, ProtoKey> {
    let (input, params) = delimited(char('('), many0(descriptor), char(')'))(input)?;
    let (input, return_type) = descriptor(input)?;
    let params = params.into_iter().map(str::to_string).collect();
    Ok((input, ProtoKey { return_type: return_type.to_string(), params }))
}

fn member_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c != ':' && c != '(')(input)
}

fn field(input: &str) -> IResult<&str, FieldKey> {
    let (input, (class, _, name, _, field_type)) =
        tuple((descriptor, tag("->"), member_name, char(':'), descriptor))(input)?;
    Ok((input, FieldKey::new(class, name, field_type)))
}

fn method(input: &str) -> IResult<&str, MethodKey> {
    let (input, (class, _, name, proto)) = tuple((descriptor, tag("->"), member_name, proto))(input)?;
    Ok((input, MethodKey { class: class.to_string(), name: name.to_string(), proto }))
}

fn parse_all<'a, T>(text: &'a str, what: &str, parser: impl FnMut(&'a str) -> IResult<&'a str, T>) -> Result<T> {
    all_consuming(parser)(text)
        .map(|(_, value)| value)
        .map_err(|_| BlockError::malformed(format!("invalid {what} key '{text}'")))
}

impl FromStr for ProtoKey {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self> {
        parse_all(s, "proto", proto)
    }
}

impl FromStr for FieldKey {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self> {
        parse_all(s, "field", field)
    }
}

impl FromStr for MethodKey {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self> {
        parse_all(s, "method", method)
    }
}

impl FromStr for Key {
    type Err = BlockError;

    /// Member and proto forms are recognized by shape; anything else that parses as a
    /// descriptor is a type key.
    fn from_str(s: &str) -> Result<Self> {
        if s.contains("->") {
            if s.contains('(') {
                return Ok(Key::Method(s.parse()?));
            }
            return Ok(Key::Field(s.parse()?));
        }
        if s.starts_with('(') {
            return Ok(Key::Proto(s.parse()?));
        }
        parse_all(s, "type", descriptor).map(|d| Key::Type(d.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_keys_parse_and_print() {
        let m: MethodKey = "Lcom/example/Foo;->run([ILjava/lang/String;J)V".parse().unwrap();
        assert_eq!(m.class, "Lcom/example/Foo;");
        assert_eq!(m.name, "run");
        assert_eq!(m.proto.params, vec!["[I", "Ljava/lang/String;", "J"]);
        assert_eq!(m.proto.return_type, "V");
        assert_eq!(m.proto.shorty(), "VLLJ");
        assert_eq!(m.to_string(), "Lcom/example/Foo;->run([ILjava/lang/String;J)V");

        let f: FieldKey = "La;->count:I".parse().unwrap();
        assert_eq!(f, FieldKey::new("La;", "count", "I"));
        assert_eq!(Key::Field(f).to_string(), "La;->count:I");
    }

    #[test]
    fn generic_key_dispatches_on_shape() {
        assert!(matches!("()V".parse::<Key>().unwrap(), Key::Proto(_)));
        assert!(matches!("[[Ljava/lang/Object;".parse::<Key>().unwrap(), Key::Type(_)));
        assert!(matches!("La;-><init>()V".parse::<Key>().unwrap(), Key::Method(_)));
        assert!("La".parse::<Key>().is_err());
        assert!("La;->x:Q".parse::<Key>().is_err());
        assert_eq!(Key::TypeList(vec!["I".into(), "La;".into()]).to_string(), "(ILa;)");
    }
}
