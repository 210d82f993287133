//! Tool handlers and tool-surface composition.
//!
//! Each functional area lives in its own module and exposes a `tools()`
//! constructor; [`compose`] merges the selected areas into a [`ToolTable`].

mod common;
mod composer;
mod registry;

mod gitops;
mod helm;
mod kubernetes;
mod mesh;
mod observability;

pub use common::{error_result, json_result};
pub use composer::{ComposeOptions, PrometheusTarget, ToolArea, TransportMode, compose, compose_tables, parse_areas};
pub use registry::{ToolContext, ToolHandler, ToolSummary, ToolTable};

pub use gitops::{GetApplicationHandler, ListApplicationsHandler};
pub use helm::ListReleasesHandler;
pub use kubernetes::{DeleteResourceHandler, GetResourceHandler, GetResourcesHandler, ListContextsHandler};
pub use mesh::ListMeshResourcesHandler;
pub use observability::PrometheusQueryHandler;
