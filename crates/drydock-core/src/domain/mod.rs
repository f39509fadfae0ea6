//! Domain model (ids, applications, builds, desired/observed state, errors).

pub mod application;
pub mod build;
pub mod cluster_target;
pub mod container;
pub mod desired;
pub mod errors;
pub mod ids;

pub use application::{Application, Commit, ContainerState, DeployType};
pub use build::{Build, BuildStatus};
pub use cluster_target::ClusterTarget;
pub use container::{Container, ContainerEvent, Observation, ObservedState};
pub use desired::{DesiredState, RuntimeTarget, StaticSite};
pub use errors::{CoreError, ErrorKind, MembershipError, Result};
pub use ids::{AppId, BuildId};
