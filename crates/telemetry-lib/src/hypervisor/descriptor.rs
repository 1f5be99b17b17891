//! Domain XML descriptor parsing

use super::{HypervisorError, Result};
use crate::models::DomainDescriptor;
use roxmltree::{Document, Node};

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn attr(node: Option<Node<'_, '_>>, name: &str) -> Option<String> {
    node.and_then(|n| n.attribute(name)).map(str::to_string)
}

/// Extract the fields the sampler needs from `virsh dumpxml` output
pub fn parse_descriptor(xml: &str) -> Result<DomainDescriptor> {
    let doc = Document::parse(xml).map_err(|e| HypervisorError::parse("dumpxml", e.to_string()))?;
    let domain = doc.root_element();
    if !domain.has_tag_name("domain") {
        return Err(HypervisorError::parse(
            "dumpxml",
            format!("root element is <{}>, expected <domain>", domain.tag_name().name()),
        ));
    }

    let os = child(domain, "os");
    let os_type_node = os.and_then(|os| child(os, "type"));
    let boot = os.and_then(|os| child(os, "boot"));
    let devices = child(domain, "devices");

    // First disk with a backing file or device; cdrom drives are often empty
    let disk_image = devices.and_then(|devices| {
        devices
            .children()
            .filter(|n| n.has_tag_name("disk"))
            .filter_map(|disk| child(disk, "source"))
            .find_map(|source| source.attribute("file").or_else(|| source.attribute("dev")))
            .map(str::to_string)
    });

    let network_device = devices.and_then(|devices| {
        devices
            .children()
            .filter(|n| n.has_tag_name("interface"))
            .filter_map(|iface| child(iface, "target"))
            .find_map(|target| target.attribute("dev"))
            .map(str::to_string)
    });

    Ok(DomainDescriptor {
        os_type: os_type_node
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        os_arch: attr(os_type_node, "arch"),
        os_machine: attr(os_type_node, "machine"),
        os_boot: attr(boot, "dev"),
        disk_image,
        network_device,
    })
}
