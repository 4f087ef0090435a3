//! Resource model
//!
//! Plain data types for every resource the stack declares. Each type knows how
//! to add itself to a [`Template`](crate::template::Template).

pub mod iam;
pub mod intrinsic;
pub mod lambda;
pub mod network;
pub mod rds;

pub use iam::{Effect, ManagedPolicy, Policy, PolicyDocument, PolicyStatement, Role, ServicePrincipal};
pub use lambda::{Architecture, Code, FunctionConfig, LambdaFunction, Permission, Runtime, VpcPlacement};
pub use network::{IngressRule, Ipv4Cidr, Peer, Port, SecurityGroup, Vpc};
pub use rds::{
    DatabaseInstance, DatabaseProxy, DatabaseSecret, ParameterGroup, PostgresEngine, RemovalPolicy,
    SubnetGroup,
};
