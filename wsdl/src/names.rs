use std::fmt;

pub const WSDL_NAMESPACE: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
/// The prefix `xml` is by definition bound to this namespace name.
/// (Namespaces in XML 1.0, §3, Reserved Prefixes and Namespace Names)
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const NIEM_CORE_NAMESPACE: &str = "http://release.niem.gov/niem/niem-core/4.0/";
pub const NIEM_APPINFO_NAMESPACE: &str = "http://release.niem.gov/niem/appinfo/4.0/";

/// A namespace-qualified name, independent of any prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local_name: String,
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = self.namespace.as_ref() {
            write!(f, "{{{}}}{}", namespace, self.local_name)
        } else {
            write!(f, "{}", self.local_name)
        }
    }
}

impl ExpandedName {
    pub fn with_namespace(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self::with_optional_namespace(Some(namespace), local_name)
    }

    pub fn with_optional_namespace(
        namespace: Option<impl Into<String>>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.map(Into::into),
            local_name: local_name.into(),
        }
    }

    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    pub fn wsdl(local_name: impl Into<String>) -> Self {
        Self::with_namespace(WSDL_NAMESPACE, local_name)
    }

    pub fn xsd(local_name: impl Into<String>) -> Self {
        Self::with_namespace(XSD_NAMESPACE, local_name)
    }

    /// Parses Clark notation (`{uri}local`). Anything else is taken as a name without namespace.
    pub fn from_clark(source: &str) -> Self {
        match split_clark(source) {
            Some((namespace, local_name)) => Self::with_namespace(namespace, local_name),
            None => Self::local(source),
        }
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }
}

/// Splits a Clark notation token into namespace and local name.
pub fn split_clark(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_prefix('{')?;
    let (namespace, local_name) = rest.split_once('}')?;
    if namespace.is_empty() || local_name.is_empty() {
        return None;
    }
    Some((namespace, local_name))
}
