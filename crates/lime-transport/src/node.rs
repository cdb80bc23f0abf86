use crate::TransportError;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Logical identity of a peer: `name@domain`.
///
/// Both parts are optional. Equality and hashing ignore ASCII case, so
/// `Alice@Example.org` and `alice@example.org` route to the same peer.
#[derive(Clone, Default)]
pub struct Identity {
    pub name: Option<String>,
    pub domain: Option<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: non_empty(name.into()),
            domain: non_empty(domain.into()),
        }
    }

    /// Attach an instance, producing a full endpoint address.
    pub fn with_instance(&self, instance: impl Into<String>) -> Node {
        Node {
            identity: self.clone(),
            instance: non_empty(instance.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.domain.is_none()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.name, &other.name) && eq_ignore_case(&self.domain, &other.domain)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_lowercase(&self.name, state);
        hash_lowercase(&self.domain, state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{domain}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

impl FromStr for Identity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let node: Node = s.parse()?;
        if node.instance.is_some() {
            return Err(TransportError::InvalidNode(s.to_string()));
        }
        Ok(node.identity)
    }
}

/// Fully qualified endpoint address: `name@domain/instance`.
///
/// Two nodes that share an [`Identity`] reach the same logical peer
/// regardless of instance; use [`Node::identity`] for that comparison.
/// Node equality itself includes the instance (case-insensitive).
#[derive(Clone, Default)]
pub struct Node {
    pub identity: Identity,
    pub instance: Option<String>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Identity::new(name, domain).with_instance(instance)
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.name.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.identity.domain.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// True when both nodes address the same logical peer.
    pub fn same_identity(&self, other: &Node) -> bool {
        self.identity == other.identity
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty() && self.instance.is_none()
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Self {
            identity,
            instance: None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && eq_ignore_case(&self.instance, &other.instance)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        hash_lowercase(&self.instance, state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if let Some(instance) = &self.instance {
            write!(f, "/{instance}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({self})")
    }
}

impl FromStr for Node {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::InvalidNode(s.to_string()));
        }

        let (address, instance) = match s.split_once('/') {
            Some((address, instance)) => (address, Some(instance)),
            None => (s, None),
        };
        let (name, domain) = match address.split_once('@') {
            Some((name, domain)) => (name, Some(domain)),
            None => (address, None),
        };

        let invalid = |part: &str| part.contains(['@', '/']) || part.chars().any(char::is_whitespace);
        if invalid(name) || domain.is_some_and(invalid) || instance.is_some_and(|i| i.contains('/')) {
            return Err(TransportError::InvalidNode(s.to_string()));
        }

        Ok(Self {
            identity: Identity {
                name: non_empty(name.to_string()),
                domain: domain.and_then(|d| non_empty(d.to_string())),
            },
            instance: instance.and_then(|i| non_empty(i.to_string())),
        })
    }
}

impl serde::Serialize for Node {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Node {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn eq_ignore_case(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

fn hash_lowercase<H: Hasher>(part: &Option<String>, state: &mut H) {
    match part {
        Some(s) => {
            1u8.hash(state);
            for b in s.bytes() {
                b.to_ascii_lowercase().hash(state);
            }
        }
        None => 0u8.hash(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_full_node() {
        let node: Node = "alice@example.org/home".parse().unwrap();
        assert_eq!(node.name(), Some("alice"));
        assert_eq!(node.domain(), Some("example.org"));
        assert_eq!(node.instance.as_deref(), Some("home"));
        assert_eq!(node.to_string(), "alice@example.org/home");
    }

    #[test]
    fn parse_partial_nodes() {
        let domain_only: Node = "@example.org".parse().unwrap();
        assert_eq!(domain_only.name(), None);
        assert_eq!(domain_only.domain(), Some("example.org"));

        let name_only: Node = "postmaster".parse().unwrap();
        assert_eq!(name_only.name(), Some("postmaster"));
        assert_eq!(name_only.domain(), None);
        assert_eq!(name_only.instance, None);
    }

    #[test]
    fn reject_malformed_nodes() {
        assert!("".parse::<Node>().is_err());
        assert!("a@b@c".parse::<Node>().is_err());
        assert!("a b@c".parse::<Node>().is_err());
        assert!("alice@example.org/home".parse::<Identity>().is_err());
    }

    #[test]
    fn equality_ignores_case() {
        let a: Node = "Alice@Example.org/Home".parse().unwrap();
        let b: Node = "alice@example.org/home".parse().unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn same_identity_across_instances() {
        let a: Node = "alice@example.org/phone".parse().unwrap();
        let b: Node = "alice@example.org/desktop".parse().unwrap();
        assert_ne!(a, b);
        assert!(a.same_identity(&b));
    }

    #[test]
    fn serde_as_string() {
        let node = Node::new("bob", "example.org", "work");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, "\"bob@example.org/work\"");
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
