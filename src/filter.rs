//! Link filters scoping pools to the links requests arrive on.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::range::Range;

/// What the server knows about the link a request arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkContext {
    /// Name of the local interface that received the request.
    pub interface: Option<String>,
    /// Link address from the relay agent, or the interface address for
    /// directly connected clients.
    pub link_address: Option<IpAddr>,
    /// Vendor class data supplied by the client.
    pub vendor_class: Option<String>,
}

/// A single condition on the requesting link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterExpression {
    Interface(String),
    LinkAddress(Range),
    VendorClass(String),
}

impl FilterExpression {
    pub fn matches(&self, link: &LinkContext) -> bool {
        match self {
            FilterExpression::Interface(name) => link.interface.as_deref() == Some(name.as_str()),
            FilterExpression::LinkAddress(range) => {
                link.link_address.is_some_and(|addr| range.contains(addr))
            }
            FilterExpression::VendorClass(class) => {
                link.vendor_class.as_deref() == Some(class.as_str())
            }
        }
    }
}

/// A named predicate over [`LinkContext`].
///
/// Matches when every expression matches. A filter without expressions
/// matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFilter {
    pub name: String,
    #[serde(default)]
    pub expressions: Vec<FilterExpression>,
}

impl LinkFilter {
    pub fn new(name: impl Into<String>, expressions: Vec<FilterExpression>) -> Self {
        Self {
            name: name.into(),
            expressions,
        }
    }

    pub fn matches(&self, link: &LinkContext) -> bool {
        self.expressions.iter().all(|expression| expression.matches(link))
    }
}
