//! Attribute parsing for `#[derive(FilterSchema)]`.

use syn::ext::IdentExt;
use syn::meta::ParseNestedMeta;
use syn::{Attribute, Data, DeriveInput, Expr, Fields, LitStr, Token};

/// A field that takes part in merging.
#[derive(Debug, PartialEq, Eq)]
pub struct MergeField {
    /// Name as it appears in the serialized config.
    pub serialized_name: String,
    /// Keep the parent value when the child's is zero.
    pub preserve: bool,
}

/// Everything the derive needs from the annotated struct.
#[derive(Debug)]
pub struct SchemaInput {
    pub fields: Vec<MergeField>,
}

impl SchemaInput {
    pub fn from_derive(input: &DeriveInput) -> syn::Result<Self> {
        if let Some(attr) = input.attrs.iter().find(|a| a.path().is_ident("gonvoy")) {
            return Err(syn::Error::new_spanned(
                attr,
                "#[gonvoy(...)] is only supported on fields",
            ));
        }

        let named = match &input.data {
            Data::Struct(data) => match &data.fields {
                Fields::Named(named) => named,
                _ => {
                    return Err(syn::Error::new_spanned(
                        &input.ident,
                        "FilterSchema can only be derived for structs with named fields",
                    ))
                }
            },
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "FilterSchema can only be derived for structs",
                ))
            }
        };

        let rename_all = container_rename_rule(&input.attrs)?;

        let mut fields = Vec::new();
        for field in &named.named {
            let Some((mergeable, preserve)) = merge_flags(&field.attrs)? else {
                continue;
            };
            if !mergeable && !preserve {
                continue;
            }

            let serialized_name = match field_rename(&field.attrs)? {
                Some(name) => name,
                None => {
                    // Named fields always carry an ident.
                    let ident = field.ident.as_ref().map(|i| i.unraw().to_string());
                    let ident = ident.unwrap_or_default();
                    match rename_all {
                        Some(rule) => rule.apply(&ident),
                        None => ident,
                    }
                }
            };

            fields.push(MergeField {
                serialized_name,
                preserve,
            });
        }

        Ok(Self { fields })
    }
}

/// Reads `#[gonvoy(mergeable, preserve)]`. `None` when the field has no
/// gonvoy attribute at all.
fn merge_flags(attrs: &[Attribute]) -> syn::Result<Option<(bool, bool)>> {
    let mut found = false;
    let mut mergeable = false;
    let mut preserve = false;

    for attr in attrs.iter().filter(|a| a.path().is_ident("gonvoy")) {
        found = true;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("mergeable") {
                mergeable = true;
                Ok(())
            } else if meta.path.is_ident("preserve") {
                preserve = true;
                Ok(())
            } else {
                Err(meta.error("unknown gonvoy attribute, expected `mergeable` or `preserve`"))
            }
        })?;
    }

    Ok(found.then_some((mergeable, preserve)))
}

/// `#[serde(rename = "...")]` or the serialize half of
/// `#[serde(rename(serialize = "..."))]`.
fn field_rename(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut rename = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                rename = serialize_name(&meta)?.map(|s| s.value());
                Ok(())
            } else {
                skip(&meta)
            }
        })?;
    }
    Ok(rename)
}

fn container_rename_rule(attrs: &[Attribute]) -> syn::Result<Option<RenameRule>> {
    let mut rule = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if let Some(lit) = serialize_name(&meta)? {
                    rule = Some(RenameRule::parse(&lit)?);
                }
                Ok(())
            } else {
                skip(&meta)
            }
        })?;
    }
    Ok(rule)
}

/// Value of `key = "..."` or of `serialize` inside `key(serialize = "...", ...)`.
fn serialize_name(meta: &ParseNestedMeta) -> syn::Result<Option<LitStr>> {
    if meta.input.peek(Token![=]) {
        return meta.value()?.parse().map(Some);
    }

    let mut name = None;
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("serialize") {
            name = Some(inner.value()?.parse()?);
            Ok(())
        } else {
            skip(&inner)
        }
    })?;
    Ok(name)
}

/// Consume a serde attribute the derive does not care about.
fn skip(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<proc_macro2::TokenStream>()?;
    }
    Ok(())
}

/// serde's `rename_all` conventions, applied to snake_case field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> syn::Result<Self> {
        let rule = match lit.value().as_str() {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            other => {
                return Err(syn::Error::new_spanned(
                    lit,
                    format!("unknown rename rule `{other}`"),
                ))
            }
        };
        Ok(rule)
    }

    pub fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Pascal => {
                let mut out = String::with_capacity(field.len());
                let mut capitalize = true;
                for c in field.chars() {
                    if c == '_' {
                        capitalize = true;
                    } else if capitalize {
                        out.push(c.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        out.push(c);
                    }
                }
                out
            }
            RenameRule::Camel => {
                let pascal = RenameRule::Pascal.apply(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
        }
    }
}
