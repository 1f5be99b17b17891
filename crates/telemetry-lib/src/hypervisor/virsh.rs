//! libvirt access through the `virsh` client
//!
//! Each data point is one `virsh -c <uri> <command>` invocation:
//! - `domstate` for the run state
//! - `domstats --cpu-total` / `--vcpu` for CPU time and vCPU count
//! - `dommemstat` for balloon and resident memory
//! - `domifstat` / `domblkstat` for interface and block counters
//! - `dumpxml` for the domain descriptor

use super::descriptor::parse_descriptor;
use super::runner::{CommandRunner, ProcessRunner};
use super::{Hypervisor, HypervisorError, Result, VmHandle};
use crate::models::{
    BlockStats, CpuCount, CpuCounterSample, DomainDescriptor, InterfaceStats, MemorySnapshot,
    RunState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Connection state shared by the hypervisor and every VM handle
struct Connection<R> {
    uri: String,
    virsh: String,
    runner: R,
}

impl<R: CommandRunner> Connection<R> {
    async fn exec(&self, args: &[&str]) -> Result<String> {
        let mut full_args = vec!["-c".to_string(), self.uri.clone()];
        full_args.extend(args.iter().map(|a| a.to_string()));

        debug!(uri = %self.uri, command = %args.join(" "), "Running virsh");
        let output = self.runner.run(&self.virsh, &full_args).await?;

        if !output.success {
            return Err(HypervisorError::Command {
                command: args.join(" "),
                message: output.stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl<R> Drop for Connection<R> {
    fn drop(&mut self) {
        info!(uri = %self.uri, "Released hypervisor connection");
    }
}

/// Hypervisor connection driven by `virsh`
pub struct VirshHypervisor<R = ProcessRunner> {
    conn: Arc<Connection<R>>,
}

impl<R: CommandRunner> VirshHypervisor<R> {
    /// Open a connection and verify the hypervisor answers on `uri`
    pub async fn open(uri: &str, virsh: &str, runner: R) -> Result<Self> {
        let conn = Connection {
            uri: uri.to_string(),
            virsh: virsh.to_string(),
            runner,
        };

        match conn.exec(&["uri"]).await {
            Ok(canonical) => {
                info!(uri = %uri, canonical = %canonical.trim(), "Connected to hypervisor");
            }
            Err(HypervisorError::Command { message, .. }) => {
                return Err(HypervisorError::Connection {
                    uri: uri.to_string(),
                    message,
                });
            }
            Err(HypervisorError::Io(e)) => {
                return Err(HypervisorError::Connection {
                    uri: uri.to_string(),
                    message: format!("cannot run {}: {}", virsh, e),
                });
            }
            Err(e) => return Err(e),
        }

        Ok(Self {
            conn: Arc::new(conn),
        })
    }
}

#[async_trait]
impl<R: CommandRunner + 'static> Hypervisor for VirshHypervisor<R> {
    type Vm = VirshVm<R>;

    fn uri(&self) -> &str {
        &self.conn.uri
    }

    async fn list_vm_names(&self) -> Result<Vec<String>> {
        let stdout = self.conn.exec(&["list", "--all", "--name"]).await?;
        Ok(parse_name_list(&stdout))
    }

    async fn lookup_vm(&self, name: &str) -> Result<VirshVm<R>> {
        let uuid = match self.conn.exec(&["domuuid", name]).await {
            Ok(stdout) => stdout.trim().to_string(),
            Err(HypervisorError::Command { message, .. }) if is_missing_domain(&message) => {
                return Err(HypervisorError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e),
        };

        Ok(VirshVm {
            conn: self.conn.clone(),
            name: name.to_string(),
            uuid,
        })
    }
}

/// A VM reached through a [`VirshHypervisor`]
pub struct VirshVm<R = ProcessRunner> {
    conn: Arc<Connection<R>>,
    name: String,
    uuid: String,
}

#[async_trait]
impl<R: CommandRunner + 'static> VmHandle for VirshVm<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn uuid(&self) -> Result<String> {
        Ok(self.uuid.clone())
    }

    async fn run_state(&self) -> Result<RunState> {
        let stdout = self.conn.exec(&["domstate", &self.name]).await?;
        Ok(parse_run_state(&stdout))
    }

    async fn cpu_counter_sample(&self) -> Result<CpuCounterSample> {
        let stdout = self
            .conn
            .exec(&["domstats", "--cpu-total", "--raw", &self.name])
            .await?;
        let cpu_time = parse_domstats(&stdout)
            .get("cpu.time")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| HypervisorError::parse("domstats --cpu-total", "missing cpu.time"))?;

        Ok(CpuCounterSample::now(cpu_time))
    }

    async fn vcpu_count(&self) -> Result<CpuCount> {
        let stdout = self
            .conn
            .exec(&["domstats", "--vcpu", "--raw", &self.name])
            .await?;
        let stats = parse_domstats(&stdout);

        stats
            .get("vcpu.maximum")
            .or_else(|| stats.get("vcpu.current"))
            .and_then(|v| v.parse::<u32>().ok())
            .and_then(CpuCount::new)
            .ok_or_else(|| HypervisorError::parse("domstats --vcpu", "missing or zero vcpu count"))
    }

    async fn memory_snapshot(&self) -> Result<MemorySnapshot> {
        let stdout = self.conn.exec(&["dommemstat", &self.name]).await?;
        parse_memory_snapshot(&stdout)
    }

    async fn max_memory_bytes(&self) -> Result<u64> {
        let stdout = self.conn.exec(&["dominfo", &self.name]).await?;
        parse_max_memory(&stdout)
    }

    async fn interface_stats(&self, device: &str) -> Result<InterfaceStats> {
        let stdout = self.conn.exec(&["domifstat", &self.name, device]).await?;
        Ok(parse_interface_stats(&stdout))
    }

    async fn block_stats(&self, path: &str) -> Result<BlockStats> {
        let stdout = self.conn.exec(&["domblkstat", &self.name, path]).await?;
        Ok(parse_block_stats(&stdout))
    }

    async fn descriptor(&self) -> Result<DomainDescriptor> {
        let stdout = self.conn.exec(&["dumpxml", &self.name]).await?;
        parse_descriptor(&stdout)
    }
}

fn is_missing_domain(message: &str) -> bool {
    message.contains("failed to get domain") || message.contains("Domain not found")
}

/// Parse `list --name` output, one VM name per line
pub fn parse_name_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `domstate` output
pub fn parse_run_state(content: &str) -> RunState {
    let state = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    match state {
        "running" => RunState::Running,
        "idle" | "blocked" => RunState::Blocked,
        "paused" => RunState::Paused,
        "in shutdown" | "shutdown" => RunState::Shutdown,
        "shut off" => RunState::Shutoff,
        "crashed" => RunState::Crashed,
        "pmsuspended" => RunState::Suspended,
        _ => RunState::Unknown,
    }
}

/// Parse `domstats --raw` output into `key=value` pairs
pub fn parse_domstats(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Parse counter listings where the last two fields are name and value
///
/// Covers `dommemstat` (`actual 1048576`) as well as `domifstat` and
/// `domblkstat` (`vnet0 rx_bytes 1234`).
pub fn parse_counters(content: &str) -> HashMap<String, i64> {
    let mut counters = HashMap::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            let name = parts[parts.len() - 2];
            if let Ok(value) = parts[parts.len() - 1].parse::<i64>() {
                counters.insert(name.to_string(), value);
            }
        }
    }

    counters
}

/// Parse `dommemstat` output; values are reported in KiB
pub fn parse_memory_snapshot(content: &str) -> Result<MemorySnapshot> {
    let counters = parse_counters(content);
    let kib = |name: &str| -> Result<u64> {
        counters
            .get(name)
            .and_then(|v| u64::try_from(*v).ok())
            .map(|v| v.saturating_mul(1024))
            .ok_or_else(|| HypervisorError::parse("dommemstat", format!("missing {}", name)))
    };

    Ok(MemorySnapshot {
        resident_bytes: kib("rss")?,
        actual_bytes: kib("actual")?,
    })
}

/// Parse `domifstat` output; absent counters stay at `-1`
pub fn parse_interface_stats(content: &str) -> InterfaceStats {
    let counters = parse_counters(content);
    let get = |name: &str| counters.get(name).copied().unwrap_or(-1);

    InterfaceStats {
        rx_bytes: get("rx_bytes"),
        rx_packets: get("rx_packets"),
        rx_errs: get("rx_errs"),
        rx_drop: get("rx_drop"),
        tx_bytes: get("tx_bytes"),
        tx_packets: get("tx_packets"),
        tx_errs: get("tx_errs"),
        tx_drop: get("tx_drop"),
    }
}

/// Parse `domblkstat` output; absent counters stay at `-1`
pub fn parse_block_stats(content: &str) -> BlockStats {
    let counters = parse_counters(content);
    let get = |name: &str| counters.get(name).copied().unwrap_or(-1);

    BlockStats {
        rd_req: get("rd_req"),
        rd_bytes: get("rd_bytes"),
        wr_req: get("wr_req"),
        wr_bytes: get("wr_bytes"),
        errs: get("errs"),
    }
}

/// Parse the `Max memory:` line of `dominfo` output
pub fn parse_max_memory(content: &str) -> Result<u64> {
    content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Max memory")
        .and_then(|(_, value)| value.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib.saturating_mul(1024))
        .ok_or_else(|| HypervisorError::parse("dominfo", "missing Max memory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_VIRSH as VIRSH;
    use crate::hypervisor::CommandOutput;
    use std::sync::Mutex;

    /// Runner that answers from a table keyed by the virsh subcommand line
    struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(responses: &[(&str, CommandOutput)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            // Skip "-c <uri>"
            let key = args[2..].join(" ");
            Ok(self
                .responses
                .get(&key)
                .cloned()
                .unwrap_or_else(|| CommandOutput::failed(format!("unexpected command: {}", key))))
        }
    }

    const URI: &str = "qemu:///system";

    async fn connect(responses: &[(&str, CommandOutput)]) -> VirshHypervisor<ScriptedRunner> {
        let mut all = vec![("uri", CommandOutput::ok("qemu:///system\n"))];
        all.extend(responses.iter().cloned());
        VirshHypervisor::open(URI, VIRSH, ScriptedRunner::new(&all))
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_run_state() {
        assert_eq!(parse_run_state("running\n\n"), RunState::Running);
        assert_eq!(parse_run_state("shut off\n"), RunState::Shutoff);
        assert_eq!(parse_run_state("idle\n"), RunState::Blocked);
        assert_eq!(parse_run_state("in shutdown\n"), RunState::Shutdown);
        assert_eq!(parse_run_state("pmsuspended\n"), RunState::Suspended);
        assert_eq!(parse_run_state("no state\n"), RunState::Unknown);
        assert_eq!(parse_run_state(""), RunState::Unknown);
    }

    #[test]
    fn test_parse_domstats() {
        let content = r#"Domain: 'debian12'
  cpu.time=123456789012
  cpu.user=100000000000
  cpu.system=23456789012
"#;
        let stats = parse_domstats(content);
        assert_eq!(stats.get("cpu.time").map(String::as_str), Some("123456789012"));
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn test_parse_memory_snapshot() {
        let content = "actual 2097152\nswap_in 0\nunused 1048576\navailable 2040000\nrss 524288\n";
        let snapshot = parse_memory_snapshot(content).unwrap();

        assert_eq!(snapshot.actual_bytes, 2097152 * 1024);
        assert_eq!(snapshot.resident_bytes, 524288 * 1024);
        assert_eq!(snapshot.percentage_of_actual(), Some(25.0));
    }

    #[test]
    fn test_parse_memory_snapshot_missing_rss() {
        assert!(parse_memory_snapshot("actual 2097152\n").is_err());
    }

    #[test]
    fn test_parse_interface_stats() {
        let content = r#"vnet3 rx_bytes 1048576
vnet3 rx_packets 812
vnet3 rx_errs 0
vnet3 rx_drop 3
vnet3 tx_bytes 65536
vnet3 tx_packets 402
vnet3 tx_errs 0
vnet3 tx_drop 0
"#;
        let stats = parse_interface_stats(content);
        assert_eq!(stats.rx_bytes, 1048576);
        assert_eq!(stats.rx_drop, 3);
        assert_eq!(stats.tx_packets, 402);
    }

    #[test]
    fn test_parse_block_stats_without_errs() {
        let content = r#"vda rd_req 4096
vda rd_bytes 167772160
vda wr_req 1024
vda wr_bytes 41943040
vda flush_operations 12
vda rd_total_times 900000000
"#;
        let stats = parse_block_stats(content);
        assert_eq!(stats.rd_req, 4096);
        assert_eq!(stats.wr_bytes, 41943040);
        assert_eq!(stats.errs, -1);
    }

    #[test]
    fn test_parse_max_memory() {
        let content = r#"Id:             3
Name:           debian12
UUID:           5f0a5b5e-8c61-4a36-9d3a-0c1b8f3b6a11
State:          running
CPU(s):         2
Max memory:     2097152 KiB
Used memory:    2097152 KiB
"#;
        assert_eq!(parse_max_memory(content).unwrap(), 2097152 * 1024);
        assert!(parse_max_memory("Name: x\n").is_err());
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(parse_name_list("debian12\nwin11\n\n"), vec!["debian12", "win11"]);
        assert!(parse_name_list("\n").is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let runner = ScriptedRunner::new(&[(
            "uri",
            CommandOutput::failed("error: failed to connect to the hypervisor"),
        )]);

        let err = VirshHypervisor::open(URI, VIRSH, runner).await.err().unwrap();
        assert!(matches!(err, HypervisorError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_lookup_missing_vm() {
        let hypervisor = connect(&[(
            "domuuid ghost",
            CommandOutput::failed("error: failed to get domain 'ghost'"),
        )])
        .await;

        let err = hypervisor.lookup_vm("ghost").await.err().unwrap();
        assert!(matches!(err, HypervisorError::NotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_vm_handle_queries() {
        let hypervisor = connect(&[
            ("domuuid debian12", CommandOutput::ok("5f0a5b5e\n")),
            ("domstate debian12", CommandOutput::ok("running\n")),
            (
                "domstats --cpu-total --raw debian12",
                CommandOutput::ok("Domain: 'debian12'\n  cpu.time=5000000000\n"),
            ),
            (
                "domstats --vcpu --raw debian12",
                CommandOutput::ok("Domain: 'debian12'\n  vcpu.current=2\n  vcpu.maximum=4\n"),
            ),
            ("domifstat debian12 vnet3", CommandOutput::ok("vnet3 rx_bytes 10\n")),
        ])
        .await;

        let vm = hypervisor.lookup_vm("debian12").await.unwrap();
        assert_eq!(vm.name(), "debian12");
        assert_eq!(vm.uuid().await.unwrap(), "5f0a5b5e");
        assert_eq!(vm.run_state().await.unwrap(), RunState::Running);
        assert_eq!(vm.vcpu_count().await.unwrap().get(), 4);

        let sample = vm.cpu_counter_sample().await.unwrap();
        assert_eq!(sample.cumulative_cpu_time_ns, 5_000_000_000);

        let net = vm.interface_stats("vnet3").await.unwrap();
        assert_eq!(net.rx_bytes, 10);
        assert_eq!(net.tx_bytes, -1);
    }

    #[tokio::test]
    async fn test_commands_carry_uri() {
        let hypervisor = connect(&[("list --all --name", CommandOutput::ok("a\nb\n"))]).await;

        let names = hypervisor.list_vm_names().await.unwrap();
        assert_eq!(names, vec!["a", "b"]);

        let calls = hypervisor.conn.runner.calls.lock().unwrap();
        assert!(calls.iter().all(|args| args[0] == "-c" && args[1] == URI));
    }
}
