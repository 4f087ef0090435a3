//! Network perimeter: VPC, security groups and ingress rules

use serde_json::{json, Value};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::config::EnvironmentConfig;
use crate::error::{Error, Result};
use crate::resources::intrinsic::get_att;
use crate::template::{Resource, Template};
use crate::utils::{logical_id, scoped_logical_id};

/// An IPv4 CIDR block such as `10.0.0.0/16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::ValidationError(format!(
                "CIDR prefix /{} is out of range",
                prefix
            )));
        }
        Ok(Self { address, prefix })
    }

    /// True for `0.0.0.0/0`, i.e. the whole internet
    pub fn is_any(&self) -> bool {
        self.prefix == 0
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether an address falls inside this block
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        if self.prefix == 0 {
            return true;
        }
        let mask = u32::MAX << (32 - u32::from(self.prefix));
        (u32::from(self.address) & mask) == (u32::from(address) & mask)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::ValidationError(format!("'{}' is not a CIDR block", s)))?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::ValidationError(format!("'{}' is not an IPv4 address", address)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::ValidationError(format!("'{}' is not a CIDR prefix", prefix)))?;
        Self::new(address, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// An existing VPC the stack deploys into
///
/// The VPC is not managed by this stack; its id, CIDR and private subnets come
/// from the environment table.
#[derive(Debug, Clone, PartialEq)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: Ipv4Cidr,
    pub private_subnet_ids: Vec<String>,
}

impl Vpc {
    pub fn from_environment(config: &EnvironmentConfig) -> Result<Self> {
        Ok(Self {
            vpc_id: config.vpc_id.clone(),
            cidr_block: config.vpc_cidr_block()?,
            private_subnet_ids: config.private_subnet_ids.clone(),
        })
    }
}

/// A TCP port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub from_port: u16,
    pub to_port: u16,
}

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            from_port: port,
            to_port: port,
        }
    }

    pub fn protocol(&self) -> &'static str {
        "tcp"
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{}", self.from_port)
        } else {
            write!(f, "{}-{}", self.from_port, self.to_port)
        }
    }
}

/// Source of an ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Peer {
    /// Another security group, by logical id
    SecurityGroup(String),
    Ipv4(Ipv4Cidr),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::SecurityGroup(id) => f.write_str(id),
            Peer::Ipv4(cidr) => write!(f, "{}", cidr),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: Port,
    pub description: String,
}

/// A security group with all-outbound egress and explicit ingress rules
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroup {
    pub logical_id: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: String,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroup {
    pub fn new(group_name: &str, vpc: &Vpc, allow_all_outbound: bool) -> Self {
        Self {
            logical_id: logical_id(group_name),
            group_name: group_name.to_string(),
            description: group_name.to_string(),
            vpc_id: vpc.vpc_id.clone(),
            allow_all_outbound,
            ingress: Vec::new(),
        }
    }

    /// Peer referring to this group
    pub fn as_peer(&self) -> Peer {
        Peer::SecurityGroup(self.logical_id.clone())
    }

    /// Allow inbound traffic from a peer on a port
    ///
    /// Rules opening a port to `0.0.0.0/0` are rejected.
    pub fn add_ingress_rule(
        &mut self,
        peer: Peer,
        port: Port,
        description: Option<&str>,
    ) -> Result<()> {
        if let Peer::Ipv4(cidr) = &peer {
            if cidr.is_any() {
                return Err(Error::ValidationError(format!(
                    "{} may not allow ingress from {}",
                    self.group_name, cidr
                )));
            }
        }

        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("from {}:{}", peer, port));
        self.ingress.push(IngressRule {
            peer,
            port,
            description,
        });
        Ok(())
    }

    pub fn group_id(&self) -> Value {
        get_att(&self.logical_id, "GroupId")
    }

    /// Declare the group and its rules
    ///
    /// CIDR rules are inline. Group-to-group rules (including self references)
    /// become standalone ingress resources so two groups can reference each
    /// other without a dependency cycle.
    pub fn add_to(&self, template: &mut Template) -> Result<()> {
        let mut inline_ingress = Vec::new();
        let mut standalone = Vec::new();

        for rule in &self.ingress {
            match &rule.peer {
                Peer::Ipv4(cidr) => inline_ingress.push(json!({
                    "CidrIp": cidr.to_string(),
                    "Description": rule.description,
                    "FromPort": rule.port.from_port,
                    "IpProtocol": rule.port.protocol(),
                    "ToPort": rule.port.to_port,
                })),
                Peer::SecurityGroup(source_id) => {
                    let rule_id = scoped_logical_id(
                        &self.logical_id,
                        &format!("from-{}-{}", source_id, rule.port),
                    );
                    let resource = Resource::new(
                        "AWS::EC2::SecurityGroupIngress",
                        json!({
                            "Description": rule.description,
                            "FromPort": rule.port.from_port,
                            "GroupId": self.group_id(),
                            "IpProtocol": rule.port.protocol(),
                            "SourceSecurityGroupId": get_att(source_id, "GroupId"),
                            "ToPort": rule.port.to_port,
                        }),
                    );
                    standalone.push((rule_id, resource));
                }
            }
        }

        let egress = if self.allow_all_outbound {
            json!([{
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default",
                "IpProtocol": "-1",
            }])
        } else {
            // A rule that matches nothing, so CloudFormation does not add its default
            json!([{
                "CidrIp": "255.255.255.255/32",
                "Description": "Disallow all traffic",
                "FromPort": 252,
                "IpProtocol": "icmp",
                "ToPort": 86,
            }])
        };

        let mut properties = json!({
            "GroupDescription": self.description,
            "GroupName": self.group_name,
            "SecurityGroupEgress": egress,
            "VpcId": self.vpc_id,
        });
        if !inline_ingress.is_empty() {
            properties["SecurityGroupIngress"] = Value::Array(inline_ingress);
        }

        template.add_resource(
            self.logical_id.clone(),
            Resource::new("AWS::EC2::SecurityGroup", properties),
        )?;
        for (rule_id, resource) in standalone {
            template.add_resource(rule_id, resource)?;
        }

        Ok(())
    }
}
