use std::net::{IpAddr, Ipv4Addr};

use tokio::runtime::{Builder, Runtime};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;

use super::error::LookupError;

/// Reverse DNS collaborator used by the `Resolve` stage.
pub trait ReverseLookup: Send + Sync {
    /// Returns the first PTR name for `addr`, `Ok(None)` when none exists.
    fn reverse(&self, addr: Ipv4Addr) -> Result<Option<String>, LookupError>;
}

/// Async resolver shared by every scan thread.
///
/// Each caller blocks on its own lookup future, so lookups from different
/// scan threads are in flight at the same time instead of queueing behind
/// one another.
pub struct SystemResolver {
    runtime: Runtime,
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Resolver built from the system configuration (`/etc/resolv.conf`).
    pub fn from_system_conf() -> Result<Self, LookupError> {
        let runtime = dns_runtime()?;
        let resolver = {
            let _guard = runtime.enter();
            TokioAsyncResolver::tokio_from_system_conf().map_err(LookupError::resolver_init)?
        };
        Ok(Self { runtime, resolver })
    }

    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Result<Self, LookupError> {
        let runtime = dns_runtime()?;
        let resolver = {
            let _guard = runtime.enter();
            TokioAsyncResolver::tokio(config, opts)
        };
        Ok(Self { runtime, resolver })
    }
}

fn dns_runtime() -> Result<Runtime, LookupError> {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("relayscan-dns")
        .enable_all()
        .build()
        .map_err(LookupError::resolver_init)
}

/// Builds a resolver from the system configuration.
pub fn system_resolver() -> Result<SystemResolver, LookupError> {
    SystemResolver::from_system_conf()
}

impl ReverseLookup for SystemResolver {
    fn reverse(&self, addr: Ipv4Addr) -> Result<Option<String>, LookupError> {
        let lookup = self
            .runtime
            .block_on(self.resolver.reverse_lookup(IpAddr::V4(addr)));
        match lookup {
            Ok(lookup) => Ok(lookup
                .iter()
                .next()
                .map(|name| normalize_hostname(&name.to_string()))),
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
                _ => Err(LookupError::Lookup { source: err }),
            },
        }
    }
}

pub(crate) fn normalize_hostname(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};

    use super::{ReverseLookup, SystemResolver, normalize_hostname};

    #[test]
    fn normalize_hostname_trims_dot_and_lowercases() {
        assert_eq!(normalize_hostname("Mail.EXAMPLE.com."), "mail.example.com");
    }

    /// Resolver pointed at a bound UDP socket that never answers.
    fn silent_resolver(timeout: Duration) -> (UdpSocket, SystemResolver) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind udp");
        let addr: SocketAddr = socket.local_addr().expect("addr");
        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true),
        );
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        (socket, SystemResolver::new(config, opts).expect("resolver"))
    }

    #[test]
    #[ignore = "requires loopback UDP binding"]
    fn concurrent_lookups_overlap() {
        let timeout = Duration::from_millis(400);
        let (_socket, resolver) = silent_resolver(timeout);
        let resolver = Arc::new(resolver);

        let started = Instant::now();
        let handles: Vec<_> = (1..=6u8)
            .map(|last| {
                let resolver = Arc::clone(&resolver);
                thread::spawn(move || resolver.reverse(Ipv4Addr::new(192, 0, 2, last)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("lookup thread").is_err());
        }

        // six serialized timeouts would take 2.4s
        assert!(
            started.elapsed() < timeout * 3,
            "lookups ran one after another: {:?}",
            started.elapsed()
        );
    }
}
