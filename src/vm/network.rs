//! Guest networking: mode parsing, port publishing and `-netdev` rendering.
//!
//! The `--networking` descriptor is parsed into a [`NetworkMode`] at the CLI
//! boundary. [`resolve`] then checks it against the published ports and
//! renders the string QEMU expects after `-netdev`:
//!
//! ```text
//! user            → user,id=t0[,hostfwd=tcp::8080-:80...]
//! tap,<ifname>    → tap,id=t0,ifname=<ifname>,script=no,downscript=no
//! bridge,<br>     → bridge,id=t0,br=<br>
//! none            → ""   (rendered as `-net none`)
//! ```

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{LaunchError, Result};

/// Device id shared by the `-netdev` backend and the virtio-net frontend.
pub const NETDEV_ID: &str = "t0";

// ---------------------------------------------------------------------------
// Networking mode
// ---------------------------------------------------------------------------

/// How the guest NIC is backed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// No network device at all.
    None,
    /// QEMU user-mode networking (slirp). The only mode that can publish ports.
    #[default]
    User,
    /// A pre-existing tap interface.
    Tap { ifname: String },
    /// A pre-existing bridge, attached through qemu-bridge-helper.
    Bridge { bridge: String },
}

impl NetworkMode {
    /// The descriptor keyword for this mode.
    pub fn keyword(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::User => "user",
            NetworkMode::Tap { .. } => "tap",
            NetworkMode::Bridge { .. } => "bridge",
        }
    }
}

impl FromStr for NetworkMode {
    type Err = LaunchError;

    /// Parse `mode[,arg]`. An empty descriptor means `user`.
    fn from_str(descriptor: &str) -> Result<Self> {
        let (keyword, arg) = match descriptor.split_once(',') {
            Some((keyword, arg)) => (keyword, Some(arg)),
            None => (descriptor, None),
        };

        match keyword {
            "" | "user" => no_argument("user", arg).map(|()| NetworkMode::User),
            "none" => no_argument("none", arg).map(|()| NetworkMode::None),
            "tap" => single_argument("tap", "interface name", arg)
                .map(|ifname| NetworkMode::Tap { ifname }),
            "bridge" => single_argument("bridge", "bridge name", arg)
                .map(|bridge| NetworkMode::Bridge { bridge }),
            other => Err(LaunchError::NetworkConfig(format!(
                "unknown networking mode '{other}' (expected none, user, tap,<iface> or bridge,<br>)"
            ))),
        }
    }
}

fn no_argument(mode: &str, arg: Option<&str>) -> Result<()> {
    match arg {
        None => Ok(()),
        Some(arg) => Err(LaunchError::NetworkConfig(format!(
            "networking mode '{mode}' takes no argument, got '{arg}'"
        ))),
    }
}

fn single_argument(mode: &str, what: &str, arg: Option<&str>) -> Result<String> {
    match arg {
        Some(arg) if !arg.is_empty() && !arg.contains(',') => Ok(arg.to_string()),
        Some(arg) if arg.contains(',') => Err(LaunchError::NetworkConfig(format!(
            "networking mode '{mode}' takes exactly one argument, got '{arg}'"
        ))),
        _ => Err(LaunchError::NetworkConfig(format!(
            "not enough arguments for '{mode}' networking mode: missing {what} (use {mode},<name>)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Published ports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A host port forwarded to a guest port: `HOSTPORT:GUESTPORT[/PROTO]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublish {
    pub host_port: u16,
    pub guest_port: u16,
    pub proto: Protocol,
}

impl PortPublish {
    /// The `,hostfwd=...` suffix appended to a user-mode netdev.
    pub fn hostfwd(&self) -> String {
        format!(
            ",hostfwd={}::{}-:{}",
            self.proto, self.host_port, self.guest_port
        )
    }
}

impl FromStr for PortPublish {
    type Err = LaunchError;

    fn from_str(spec: &str) -> Result<Self> {
        let invalid = |why: &str| {
            LaunchError::NetworkConfig(format!("invalid publish spec '{spec}': {why}"))
        };

        let (ports, proto) = match spec.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, other)) => return Err(invalid(&format!("unknown protocol '{other}'"))),
            None => (spec, Protocol::Tcp),
        };

        let (host, guest) = ports
            .split_once(':')
            .ok_or_else(|| invalid("expected HOSTPORT:GUESTPORT[/PROTO]"))?;
        let host_port = host
            .parse()
            .map_err(|_| invalid(&format!("invalid host port '{host}'")))?;
        let guest_port = guest
            .parse()
            .map_err(|_| invalid(&format!("invalid guest port '{guest}'")))?;

        Ok(Self {
            host_port,
            guest_port,
            proto,
        })
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the `-netdev` configuration for `mode`.
///
/// Ports may only be published in user mode. Duplicate publish specs are
/// passed through as given. An empty string means "no networking".
pub fn resolve(mode: &NetworkMode, publish: &[PortPublish]) -> Result<String> {
    if !publish.is_empty() && *mode != NetworkMode::User {
        return Err(LaunchError::NetworkConfig(format!(
            "port publishing requires 'user' networking mode, not '{}'",
            mode.keyword()
        )));
    }

    let netdev = match mode {
        NetworkMode::None => String::new(),
        NetworkMode::User => {
            let mut netdev = format!("user,id={NETDEV_ID}");
            for port in publish {
                netdev.push_str(&port.hostfwd());
            }
            netdev
        }
        NetworkMode::Tap { ifname } => {
            format!("tap,id={NETDEV_ID},ifname={ifname},script=no,downscript=no")
        }
        NetworkMode::Bridge { bridge } => format!("bridge,id={NETDEV_ID},br={bridge}"),
    };

    Ok(netdev)
}

/// Parse a raw descriptor and publish list, then [`resolve`] them.
pub fn resolve_descriptor<S: AsRef<str>>(descriptor: &str, publish: &[S]) -> Result<String> {
    let mode: NetworkMode = descriptor.parse()?;
    let publish = publish
        .iter()
        .map(|spec| spec.as_ref().parse())
        .collect::<Result<Vec<PortPublish>>>()?;
    resolve(&mode, &publish)
}

/// Derive a stable guest MAC address from the instance UUID.
///
/// The first byte gets the locally-administered bit set and the multicast
/// bit cleared, so the address never collides with vendor-assigned ones.
pub fn mac_for_instance(uuid: &Uuid) -> String {
    let bytes = uuid.as_bytes();
    let first = (bytes[0] & 0xfe) | 0x02;
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        first, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
