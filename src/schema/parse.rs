//! Protobuf IDL parser.
//!
//! Covers what schema files for stored values actually use: `syntax`, `package`, `import`,
//! messages (nested messages and enums, `oneof`, `map<K, V>`), enums, and comments. Options,
//! `reserved`, `extensions`, `service` and `extend` are accepted and skipped. Groups are not
//! supported.

use std::collections::BTreeMap;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while},
    character::complete::{char, digit1, hex_digit1, multispace1, satisfy},
    combinator::{all_consuming, cut, map, map_opt, map_res, not, opt, recognize, value},
    error::{context, convert_error, ErrorKind, ParseError, VerboseError},
    multi::many0,
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};

use super::{EnumType, FieldDef, FieldType, Label, MessageType, ProtoFile, ScalarType};
use crate::element::MAX_FIELD_NUMBER;

type Res<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

// ============================================================================
// Public API
// ============================================================================

/// Parse the text of one schema file.
///
/// On failure, returns a message pointing at the offending line.
pub fn parse_proto(text: &str) -> Result<ProtoFile, String> {
    match all_consuming(terminated(many0(top_item), ws))(text) {
        Ok((_, items)) => assemble(items),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(text, e)),
        Err(nom::Err::Incomplete(_)) => Err("incomplete schema text".to_string()),
    }
}

// ============================================================================
// Declarations, before flattening
// ============================================================================

#[derive(Clone, Debug)]
struct MessageDecl {
    name: String,
    fields: Vec<FieldDef>,
    messages: Vec<MessageDecl>,
    enums: Vec<EnumDecl>,
}

#[derive(Clone, Debug)]
struct EnumDecl {
    name: String,
    values: Vec<(String, i32)>,
}

#[derive(Clone, Debug)]
enum TopItem {
    Syntax(String),
    Package(String),
    Import(String),
    Message(MessageDecl),
    Enum(EnumDecl),
    Skip,
}

#[derive(Clone, Debug)]
enum Item {
    Field(FieldDef),
    Oneof(Vec<FieldDef>),
    Message(MessageDecl),
    Enum(EnumDecl),
    Skip,
}

// ============================================================================
// Whitespace, comments & tokens
// ============================================================================

fn comment(i: &str) -> Res<()> {
    alt((
        value((), pair(tag("//"), take_while(|c| c != '\n'))),
        value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))(i)
}

fn ws(i: &str) -> Res<()> {
    value((), many0(alt((value((), multispace1), comment))))(i)
}

fn token<'a, O>(
    parser: impl FnMut(&'a str) -> Res<'a, O>,
) -> impl FnMut(&'a str) -> Res<'a, O> {
    preceded(ws, parser)
}

fn sym<'a>(c: char) -> impl FnMut(&'a str) -> Res<'a, char> {
    token(char(c))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident(i: &str) -> Res<&str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(i)
}

fn full_ident(i: &str) -> Res<&str> {
    recognize(tuple((
        opt(char('.')),
        ident,
        many0(pair(char('.'), ident)),
    )))(i)
}

/// A keyword, not followed by anything that would make it part of a longer identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    token(terminated(tag(kw), not(satisfy(is_ident_char))))
}

fn str_lit(i: &str) -> Res<&str> {
    alt((
        preceded(char('"'), terminated(take_while(|c| c != '"'), char('"'))),
        preceded(char('\''), terminated(take_while(|c| c != '\''), char('\''))),
    ))(i)
}

fn int_lit(i: &str) -> Res<i64> {
    let (i, neg) = opt(char('-'))(i)?;
    let (i, v) = alt((
        map_res(
            preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
            |s: &str| i64::from_str_radix(s, 16),
        ),
        map_res(digit1, |s: &str| s.parse::<i64>()),
    ))(i)?;
    Ok((i, if neg.is_some() { -v } else { v }))
}

/// `{ ... }` with balanced nesting, returning the inside.
fn braced(i: &str) -> Res<&str> {
    let (rest, _) = char('{')(i)?;
    let mut depth = 1usize;
    for (idx, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&rest[idx + 1..], &rest[..idx]));
                }
            }
            _ => (),
        }
    }
    Err(nom::Err::Error(VerboseError::from_error_kind(
        i,
        ErrorKind::TakeUntil,
    )))
}

// ============================================================================
// Skipped statements
// ============================================================================

fn option_stmt(i: &str) -> Res<()> {
    value(
        (),
        tuple((
            keyword("option"),
            take_while(|c| c != ';' && c != '{'),
            opt(braced),
            sym(';'),
        )),
    )(i)
}

fn reserved_stmt(i: &str) -> Res<()> {
    value(
        (),
        tuple((
            alt((keyword("reserved"), keyword("extensions"))),
            is_not(";"),
            char(';'),
        )),
    )(i)
}

fn block_stmt(i: &str) -> Res<()> {
    value(
        (),
        tuple((
            alt((keyword("service"), keyword("extend"))),
            take_while(|c| c != '{'),
            braced,
            opt(sym(';')),
        )),
    )(i)
}

fn field_options(i: &str) -> Res<&str> {
    preceded(sym('['), terminated(take_while(|c| c != ']'), char(']')))(i)
}

// ============================================================================
// Top level
// ============================================================================

fn top_item(i: &str) -> Res<TopItem> {
    alt((
        map(syntax, TopItem::Syntax),
        map(package, TopItem::Package),
        map(import, TopItem::Import),
        map(message, TopItem::Message),
        map(enum_decl, TopItem::Enum),
        value(TopItem::Skip, option_stmt),
        value(TopItem::Skip, block_stmt),
        value(TopItem::Skip, sym(';')),
    ))(i)
}

fn syntax(i: &str) -> Res<String> {
    let (i, _) = alt((keyword("syntax"), keyword("edition")))(i)?;
    let (i, _) = sym('=')(i)?;
    let (i, version) = token(str_lit)(i)?;
    let (i, _) = sym(';')(i)?;
    Ok((i, version.to_string()))
}

fn package(i: &str) -> Res<String> {
    let (i, _) = keyword("package")(i)?;
    let (i, name) = cut(terminated(token(full_ident), sym(';')))(i)?;
    Ok((i, name.to_string()))
}

fn import(i: &str) -> Res<String> {
    let (i, _) = keyword("import")(i)?;
    let (i, _) = opt(alt((keyword("public"), keyword("weak"))))(i)?;
    let (i, path) = cut(terminated(token(str_lit), sym(';')))(i)?;
    Ok((i, path.to_string()))
}

// ============================================================================
// Messages
// ============================================================================

fn message(i: &str) -> Res<MessageDecl> {
    let (i, _) = keyword("message")(i)?;
    cut(message_body)(i)
}

fn message_body(i: &str) -> Res<MessageDecl> {
    let (i, name) = token(ident)(i)?;
    let (i, _) = sym('{')(i)?;
    let (i, items) = many0(message_item)(i)?;
    let (i, _) = context("closing brace of message", sym('}'))(i)?;

    let mut decl = MessageDecl {
        name: name.to_string(),
        fields: Vec::new(),
        messages: Vec::new(),
        enums: Vec::new(),
    };
    for item in items {
        match item {
            Item::Field(f) => decl.fields.push(f),
            Item::Oneof(fs) => decl.fields.extend(fs),
            Item::Message(m) => decl.messages.push(m),
            Item::Enum(e) => decl.enums.push(e),
            Item::Skip => (),
        }
    }
    Ok((i, decl))
}

fn message_item(i: &str) -> Res<Item> {
    alt((
        map(message, Item::Message),
        map(enum_decl, Item::Enum),
        map(oneof, Item::Oneof),
        map(map_field, Item::Field),
        value(Item::Skip, reserved_stmt),
        value(Item::Skip, option_stmt),
        value(Item::Skip, block_stmt),
        value(Item::Skip, sym(';')),
        map(field, Item::Field),
    ))(i)
}

fn label(i: &str) -> Res<Label> {
    alt((
        value(Label::Optional, keyword("optional")),
        value(Label::Required, keyword("required")),
        value(Label::Repeated, keyword("repeated")),
    ))(i)
}

fn field_number(i: &str) -> Res<u32> {
    map_res(token(int_lit), u32::try_from)(i)
}

/// `= number [options];`, the tail every field declaration shares.
fn field_tail(i: &str) -> Res<u32> {
    let (i, _) = sym('=')(i)?;
    let (i, number) = field_number(i)?;
    let (i, _) = opt(field_options)(i)?;
    let (i, _) = sym(';')(i)?;
    Ok((i, number))
}

fn field(i: &str) -> Res<FieldDef> {
    let (i, label) = opt(label)(i)?;
    let (i, ty) = token(full_ident)(i)?;
    let (i, name) = token(ident)(i)?;
    let (i, number) = field_tail(i)?;
    Ok((
        i,
        FieldDef {
            name: name.to_string(),
            number,
            label: label.unwrap_or(Label::Optional),
            ty: FieldType::from_written(ty),
            oneof: None,
        },
    ))
}

fn map_field(i: &str) -> Res<FieldDef> {
    let (i, _) = keyword("map")(i)?;
    let (i, _) = sym('<')(i)?;
    let (i, key) = map_opt(token(ident), ScalarType::from_name)(i)?;
    let (i, _) = sym(',')(i)?;
    let (i, val) = token(full_ident)(i)?;
    let (i, _) = sym('>')(i)?;
    let (i, name) = token(ident)(i)?;
    let (i, number) = field_tail(i)?;
    Ok((
        i,
        FieldDef {
            name: name.to_string(),
            number,
            label: Label::Repeated,
            ty: FieldType::Map(key, Box::new(FieldType::from_written(val))),
            oneof: None,
        },
    ))
}

fn oneof(i: &str) -> Res<Vec<FieldDef>> {
    let (i, _) = keyword("oneof")(i)?;
    cut(oneof_body)(i)
}

fn oneof_body(i: &str) -> Res<Vec<FieldDef>> {
    let (i, name) = token(ident)(i)?;
    let (i, _) = sym('{')(i)?;
    let (i, items) = many0(alt((
        value(None, option_stmt),
        value(None, sym(';')),
        map(field, Some),
    )))(i)?;
    let (i, _) = context("closing brace of oneof", sym('}'))(i)?;
    let fields = items
        .into_iter()
        .flatten()
        .map(|mut f| {
            f.oneof = Some(name.to_string());
            f
        })
        .collect();
    Ok((i, fields))
}

// ============================================================================
// Enums
// ============================================================================

fn enum_decl(i: &str) -> Res<EnumDecl> {
    let (i, _) = keyword("enum")(i)?;
    cut(enum_body)(i)
}

fn enum_body(i: &str) -> Res<EnumDecl> {
    let (i, name) = token(ident)(i)?;
    let (i, _) = sym('{')(i)?;
    let (i, items) = many0(alt((
        value(None, option_stmt),
        value(None, reserved_stmt),
        value(None, sym(';')),
        map(enum_value, Some),
    )))(i)?;
    let (i, _) = context("closing brace of enum", sym('}'))(i)?;
    Ok((
        i,
        EnumDecl {
            name: name.to_string(),
            values: items.into_iter().flatten().collect(),
        },
    ))
}

fn enum_value(i: &str) -> Res<(String, i32)> {
    let (i, name) = token(ident)(i)?;
    let (i, _) = sym('=')(i)?;
    let (i, number) = map_res(token(int_lit), i32::try_from)(i)?;
    let (i, _) = opt(field_options)(i)?;
    let (i, _) = sym(';')(i)?;
    Ok((i, (name.to_string(), number)))
}

// ============================================================================
// Flattening
// ============================================================================

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn flatten_enum(prefix: &str, decl: EnumDecl, file: &mut ProtoFile) -> Result<(), String> {
    let full_name = qualify(prefix, &decl.name);
    if file.messages.contains_key(&full_name) || file.enums.contains_key(&full_name) {
        return Err(format!("{} is defined more than once", full_name));
    }
    file.enums.insert(
        full_name.clone(),
        EnumType {
            full_name,
            values: decl.values,
        },
    );
    Ok(())
}

fn check_numbers(message: &str, fields: &[FieldDef]) -> Result<(), String> {
    let mut seen = BTreeMap::new();
    for f in fields {
        if f.number == 0 || f.number > MAX_FIELD_NUMBER {
            return Err(format!(
                "{}.{} has invalid field number {}",
                message, f.name, f.number
            ));
        }
        if let Some(other) = seen.insert(f.number, &f.name) {
            return Err(format!(
                "{} uses field number {} for both {} and {}",
                message, f.number, other, f.name
            ));
        }
    }
    Ok(())
}

fn flatten_message(prefix: &str, decl: MessageDecl, file: &mut ProtoFile) -> Result<(), String> {
    let full_name = qualify(prefix, &decl.name);
    if file.messages.contains_key(&full_name) || file.enums.contains_key(&full_name) {
        return Err(format!("{} is defined more than once", full_name));
    }
    check_numbers(&full_name, &decl.fields)?;
    for m in decl.messages {
        flatten_message(&full_name, m, file)?;
    }
    for e in decl.enums {
        flatten_enum(&full_name, e, file)?;
    }
    file.messages.insert(
        full_name.clone(),
        MessageType {
            full_name,
            fields: decl.fields,
        },
    );
    Ok(())
}

fn assemble(items: Vec<TopItem>) -> Result<ProtoFile, String> {
    let mut file = ProtoFile::default();
    let mut decls = Vec::new();
    for item in items {
        match item {
            TopItem::Syntax(s) => file.syntax = Some(s),
            TopItem::Package(p) => {
                if file.package.is_some() {
                    return Err("more than one package statement".to_string());
                }
                file.package = Some(p)
            }
            TopItem::Import(path) => file.imports.push(path),
            TopItem::Message(_) | TopItem::Enum(_) => decls.push(item),
            TopItem::Skip => (),
        }
    }
    let prefix = file.package.clone().unwrap_or_default();
    for item in decls {
        match item {
            TopItem::Message(m) => flatten_message(&prefix, m, &mut file)?,
            TopItem::Enum(e) => flatten_enum(&prefix, e, &mut file)?,
            _ => (),
        }
    }
    Ok(file)
}
