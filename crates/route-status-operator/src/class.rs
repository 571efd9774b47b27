//! Ingress class ownership
//!
//! Multiple controllers can share a cluster; each only touches routing
//! resources whose class matches its own configured class.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Annotations that select an ingress class, in lookup order
pub mod annotations {
    /// Project-scoped class annotation
    pub const PROJECT_CLASS: &str = "projectcontour.io/ingress.class";
    /// Well-known class annotation shared by ingress controllers
    pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
}

/// Resolve the class of a routing resource.
///
/// Annotations take precedence over the spec field. An unset or empty class
/// resolves to the empty string.
pub fn resource_class(metadata: &ObjectMeta, spec_class: Option<&str>) -> String {
    let from_annotation = metadata.annotations.as_ref().and_then(|annots| {
        [annotations::PROJECT_CLASS, annotations::INGRESS_CLASS]
            .iter()
            .filter_map(|key| annots.get(*key))
            .find(|value| !value.is_empty())
    });

    from_annotation
        .map(String::as_str)
        .or(spec_class)
        .unwrap_or_default()
        .to_string()
}

/// Exact class equality between a resource and a controller.
pub fn matches(resource_class: &str, controller_class: &str) -> bool {
    resource_class == controller_class
}

/// Class predicate for one controller instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassFilter {
    controller_class: String,
    default_class: Option<String>,
}

impl ClassFilter {
    /// Strict filter: resources match only on exact class equality.
    pub fn new(controller_class: impl Into<String>) -> Self {
        Self {
            controller_class: controller_class.into(),
            default_class: None,
        }
    }

    /// Let a controller with an empty class also claim `default_class`.
    ///
    /// Has no effect when the controller class is non-empty.
    pub fn with_default_class(mut self, default_class: Option<String>) -> Self {
        self.default_class = default_class.filter(|c| !c.is_empty());
        self
    }

    pub fn controller_class(&self) -> &str {
        &self.controller_class
    }

    /// Does a resource with `resource_class` belong to this controller?
    pub fn matches(&self, resource_class: &str) -> bool {
        if matches(resource_class, &self.controller_class) {
            return true;
        }

        match &self.default_class {
            Some(default) if self.controller_class.is_empty() => resource_class == default,
            _ => false,
        }
    }
}
