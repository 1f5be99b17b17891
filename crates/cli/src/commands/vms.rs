//! VM listing and inspection commands

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use telemetry_lib::hypervisor::{self, Hypervisor, VmHandle};
use telemetry_lib::RunState;

use crate::output::{
    color_state, format_bytes, format_cpu_time, or_dash, print_table, print_title, OutputFormat,
};

/// Row for the VM list
#[derive(Tabled, Serialize)]
struct VmRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Serialize)]
struct VmSummary {
    name: String,
    state: RunState,
}

/// List every VM the hypervisor knows about
pub async fn list_vms<H: Hypervisor>(hypervisor: &H, format: OutputFormat) -> Result<()> {
    let names = hypervisor
        .list_vm_names()
        .await
        .context("Failed to list VMs")?;

    let mut vms = Vec::with_capacity(names.len());
    for name in names {
        let vm = hypervisor.lookup_vm(&name).await?;
        let state = vm.run_state().await?;
        vms.push(VmSummary { name, state });
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&vms)?);
        }
        OutputFormat::Table => {
            let rows: Vec<VmRow> = vms
                .iter()
                .map(|vm| VmRow {
                    name: vm.name.clone(),
                    state: color_state(vm.state),
                })
                .collect();
            print_table(&rows, format)?;

            let running = vms.iter().filter(|vm| vm.state.is_running()).count();
            println!("\nTotal: {} VMs, {} running", vms.len(), running);
        }
    }

    Ok(())
}

/// Show identity, resources and devices of one VM
pub async fn show_info<H: Hypervisor>(hypervisor: &H, name: &str, format: OutputFormat) -> Result<()> {
    let vm = hypervisor
        .lookup_vm(name)
        .await
        .with_context(|| format!("Failed to find the domain {}", name))?;
    let info = hypervisor::vm_info(&vm).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Table => {
            print_title("VM Information", 50);
            println!("Name:            {}", info.name.cyan());
            println!("UUID:            {}", info.uuid);
            println!("State:           {}", color_state(info.state));
            println!();
            println!("{}", "Resources".bold());
            println!("{}", "-".repeat(50));
            println!("vCPUs:           {}", info.vcpus);
            println!("CPU time:        {}", format_cpu_time(info.cpu_time_ns));
            println!("Max memory:      {}", format_bytes(info.max_memory_bytes));
            println!("Resident memory: {}", format_bytes(info.resident_memory_bytes));
            println!();
            println!("{}", "Devices".bold());
            println!("{}", "-".repeat(50));
            let d = &info.descriptor;
            println!(
                "OS:              {} {} {}",
                or_dash(d.os_type.as_deref()),
                or_dash(d.os_arch.as_deref()),
                or_dash(d.os_machine.as_deref())
            );
            println!("Boot device:     {}", or_dash(d.os_boot.as_deref()));
            println!("Disk image:      {}", or_dash(d.disk_image.as_deref()));
            println!("Network device:  {}", or_dash(d.network_device.as_deref()));
        }
    }

    Ok(())
}
