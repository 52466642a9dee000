//! Path expressions addressing nodes of a property tree.
//!
//! `"company.products[0].price"` compiles to the selector list
//! `[Field(company), Field(products), Index(0), Field(price)]`. `[*]` (or a
//! bare `*` segment) fans out to every current child. On a map entry node the
//! member names `key` and `value` select the entry's key or value.

use crate::error::{GenerationError, GenerationResult};
use crate::tree::{NodeId, NodeKind, PropertyTree};
use std::fmt;

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Field(String),
    Index(usize),
    Wildcard,
    MapKey,
    MapValue,
}

impl Selector {
    /// Whether this pattern selector accepts the concrete selector `actual`
    fn accepts(&self, actual: &Selector) -> bool {
        match (self, actual) {
            (Selector::Wildcard, _) => true,
            (Selector::Field(name), Selector::MapKey) | (Selector::MapKey, Selector::Field(name)) => name == "key",
            (Selector::Field(name), Selector::MapValue) | (Selector::MapValue, Selector::Field(name)) => {
                name == "value"
            }
            _ => self == actual,
        }
    }

    fn render(&self, first: bool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Field(name) if first => write!(f, "{}", name),
            Selector::Field(name) => write!(f, ".{}", name),
            Selector::Index(index) => write!(f, "[{}]", index),
            Selector::Wildcard => write!(f, "[*]"),
            Selector::MapKey if first => write!(f, "key"),
            Selector::MapKey => write!(f, ".key"),
            Selector::MapValue if first => write!(f, "value"),
            Selector::MapValue => write!(f, ".value"),
        }
    }
}

/// A compiled path: an ordered selector list starting at the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PathExpression {
    selectors: Vec<Selector>,
}

impl PathExpression {
    /// The root path (`$`)
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_selectors(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    pub fn field(mut self, name: &str) -> Self {
        self.selectors.push(Selector::Field(name.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.selectors.push(Selector::Index(index));
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.selectors.push(Selector::Wildcard);
        self
    }

    pub fn map_key(mut self) -> Self {
        self.selectors.push(Selector::MapKey);
        self
    }

    pub fn map_value(mut self) -> Self {
        self.selectors.push(Selector::MapValue);
        self
    }

    pub fn child(&self, selector: Selector) -> Self {
        let mut selectors = self.selectors.clone();
        selectors.push(selector);
        Self { selectors }
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn is_root(&self) -> bool {
        self.selectors.is_empty()
    }

    /// This path with every index replaced by a wildcard
    pub fn wildcarded(&self) -> Self {
        let selectors = self
            .selectors
            .iter()
            .map(|s| match s {
                Selector::Index(_) => Selector::Wildcard,
                other => other.clone(),
            })
            .collect();
        Self { selectors }
    }

    pub fn has_wildcard(&self) -> bool {
        self.selectors.contains(&Selector::Wildcard)
    }

    /// Compile a dotted/bracketed expression
    pub fn parse(expression: &str) -> GenerationResult<Self> {
        let invalid = |reason: &str| GenerationError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expression.trim();
        let body = match trimmed.strip_prefix('$') {
            Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
            None => trimmed,
        };

        let mut selectors = Vec::new();
        let chars: Vec<char> = body.chars().collect();
        let mut i = 0;
        // Whether a member name may start here without a leading dot
        let mut expect_name = true;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if expect_name {
                        return Err(invalid("empty segment"));
                    }
                    expect_name = true;
                    i += 1;
                    if i == chars.len() {
                        return Err(invalid("trailing `.`"));
                    }
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| i + offset)
                        .ok_or_else(|| invalid("unclosed `[`"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    if inner == "*" {
                        selectors.push(Selector::Wildcard);
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| invalid(&format!("`{}` is not an index", inner)))?;
                        selectors.push(Selector::Index(index));
                    }
                    expect_name = false;
                    i = close + 1;
                }
                _ => {
                    if !expect_name {
                        return Err(invalid("expected `.` or `[` between segments"));
                    }
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        if chars[i] == ']' {
                            return Err(invalid("unexpected `]`"));
                        }
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(invalid("empty segment"));
                    }
                    if name == "*" {
                        selectors.push(Selector::Wildcard);
                    } else {
                        selectors.push(Selector::Field(name.to_string()));
                    }
                    expect_name = false;
                }
            }
        }

        Ok(Self { selectors })
    }

    /// Whether this pattern (possibly with wildcards) matches a concrete path
    pub fn matches(&self, concrete: &PathExpression) -> bool {
        self.selectors.len() == concrete.selectors.len()
            && self
                .selectors
                .iter()
                .zip(&concrete.selectors)
                .all(|(pattern, actual)| pattern.accepts(actual))
    }

    /// Walk the tree applying each selector, expanding children on demand.
    ///
    /// A member name that does not exist, an index past the current
    /// container size or a wildcard on a leaf is an error naming the
    /// offending segment.
    pub fn resolve(&self, tree: &mut PropertyTree) -> GenerationResult<Vec<NodeId>> {
        let mut current = vec![tree.root()];

        for (position, selector) in self.selectors.iter().enumerate() {
            let mut next = Vec::new();
            for id in current {
                let children = tree.children(id)?;
                match selector {
                    Selector::Wildcard => {
                        if tree.node(id).kind() == NodeKind::Leaf {
                            return Err(self.failure(
                                position,
                                format!("`{}` has no children", tree.node(id).ty()),
                            ));
                        }
                        next.extend(children);
                    }
                    Selector::Index(index) => match tree.node(id).kind() {
                        NodeKind::Container | NodeKind::Map => match children.get(*index) {
                            Some(child) => next.push(*child),
                            None => {
                                return Err(self.failure(
                                    position,
                                    format!("index {} out of bounds (size {})", index, children.len()),
                                ))
                            }
                        },
                        _ => {
                            return Err(self.failure(
                                position,
                                format!("`{}` is not indexable", tree.node(id).ty()),
                            ))
                        }
                    },
                    Selector::Field(_) | Selector::MapKey | Selector::MapValue => {
                        let found = children
                            .iter()
                            .copied()
                            .find(|child| tree.node(*child).selector().map_or(false, |s| selector.accepts(s)));
                        match found {
                            Some(child) => next.push(child),
                            None => {
                                return Err(self.failure(
                                    position,
                                    format!("no such member on `{}`", tree.node(id).ty()),
                                ))
                            }
                        }
                    }
                }
            }
            current = next;
        }

        Ok(current)
    }

    fn failure(&self, position: usize, reason: String) -> GenerationError {
        let segment = PathExpression::from_selectors(vec![self.selectors[position].clone()]).to_string();
        GenerationError::PathResolution {
            path: self.to_string(),
            segment,
            reason,
        }
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selectors.is_empty() {
            return write!(f, "$");
        }
        for (i, selector) in self.selectors.iter().enumerate() {
            selector.render(i == 0, f)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PathExpression {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpression::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_and_bracketed_segments() {
        let path = PathExpression::parse("company.products[0].price").unwrap();
        assert_eq!(
            path.selectors(),
            &[
                Selector::Field("company".to_string()),
                Selector::Field("products".to_string()),
                Selector::Index(0),
                Selector::Field("price".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "company.products[0].price");
    }

    #[test]
    fn test_parse_root_and_wildcards() {
        assert!(PathExpression::parse("$").unwrap().is_root());
        assert!(PathExpression::parse("").unwrap().is_root());
        assert_eq!(
            PathExpression::parse("$.tags[*]").unwrap().selectors(),
            &[Selector::Field("tags".to_string()), Selector::Wildcard]
        );
        assert_eq!(
            PathExpression::parse("items.*.name").unwrap().to_string(),
            "items[*].name"
        );
        assert_eq!(PathExpression::parse("[2]").unwrap().to_string(), "[2]");
    }

    #[test]
    fn test_parse_rejects_malformed_expressions() {
        for bad in ["a..b", "a.", "a[", "a[x]", "a[0]b", "a]"] {
            let err = PathExpression::parse(bad).unwrap_err();
            assert!(matches!(err, GenerationError::InvalidExpression { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_typed_builder_renders_canonical_form() {
        let path = PathExpression::root().field("scores").index(1).map_key();
        assert_eq!(path.to_string(), "scores[1].key");
        assert!(PathExpression::parse("scores[1].key").unwrap().matches(&path));
    }

    #[test]
    fn test_wildcarded_drops_indices() {
        let path = PathExpression::parse("orders[2].lines[0].sku").unwrap();
        assert_eq!(path.wildcarded().to_string(), "orders[*].lines[*].sku");
        assert!(path.wildcarded().has_wildcard());
        assert!(!path.has_wildcard());
    }

    #[test]
    fn test_wildcard_pattern_matching() {
        let pattern = PathExpression::parse("orders[*].lines[*]").unwrap();
        assert!(pattern.matches(&PathExpression::parse("orders[3].lines[0]").unwrap()));
        assert!(!pattern.matches(&PathExpression::parse("orders[3].lines").unwrap()));
        assert!(!pattern.matches(&PathExpression::parse("orders[3].notes[0]").unwrap()));
    }
}
