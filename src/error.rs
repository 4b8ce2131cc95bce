//! Crate-wide error type that every pipeline stage's own error wraps into,
//! carrying a [`Location`] back to the template/addon/field that triggered
//! it.

use serde::Serialize;
use snafu::Snafu;

use crate::{addons, context, expr, path, render, schema};

/// Where in the input documents an error (or diagnostic) originated.
/// Every field is optional: earlier stages (schema compilation) may only
/// know the addon name, later ones (template rendering) can pin down the
/// exact field path and expression source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Location {
    pub template_id: Option<String>,
    pub addon_name: Option<String>,
    pub instance_id: Option<String>,
    pub field_path: Option<String>,
    pub expr_source: Option<String>,
}

impl Location {
    pub fn template(id: impl Into<String>) -> Self {
        Self { template_id: Some(id.into()), ..Self::default() }
    }

    pub fn addon(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            addon_name: Some(name.into()),
            instance_id: Some(instance_id.into()),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }

    pub fn with_expr(mut self, expr_source: impl Into<String>) -> Self {
        self.expr_source = Some(expr_source.into());
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("schema error at {location:?}: {source}"))]
    Schema { source: schema::Error, location: Location },

    #[snafu(display("expression error at {location:?}: {source}"))]
    Expr { source: expr::Error, location: Location },

    #[snafu(display("path error at {location:?}: {source}"))]
    Path { source: path::patch::Error, location: Location },

    #[snafu(display("context merge error at {location:?}: {source}"))]
    Context { source: context::Error, location: Location },

    #[snafu(display("render error at {location:?}: {source}"))]
    Render { source: render::Error, location: Location },

    #[snafu(display("addon composition error at {location:?}: {source}"))]
    Addons { source: addons::Error, location: Location },

    #[snafu(display("render cancelled"))]
    Cancelled,

    #[snafu(display("maximum recursion depth ({max_depth}) exceeded at {location:?}"))]
    DepthExceeded { max_depth: usize, location: Location },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
