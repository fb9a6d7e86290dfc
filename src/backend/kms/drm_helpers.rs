// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::drm::control::{
    connector::{self, Interface},
    crtc, Device as ControlDevice, Mode, ModeTypeFlags,
};
use std::io;

pub fn interface_name(device: &impl ControlDevice, connector: connector::Handle) -> io::Result<String> {
    let conn_info = device.get_connector(connector, false)?;

    let other_short_name;
    let interface_short_name = match conn_info.interface() {
        Interface::DVII => "DVI-I",
        Interface::DVID => "DVI-D",
        Interface::DVIA => "DVI-A",
        Interface::SVideo => "S-VIDEO",
        Interface::DisplayPort => "DP",
        Interface::HDMIA => "HDMI-A",
        Interface::HDMIB => "HDMI-B",
        Interface::EmbeddedDisplayPort => "eDP",
        other => {
            other_short_name = format!("{:?}", other);
            &other_short_name
        }
    };

    Ok(format!(
        "{}-{}",
        interface_short_name,
        conn_info.interface_id()
    ))
}

/// Built-in panels of laptops and tablets.
pub fn is_internal_interface(interface: Interface) -> bool {
    interface == Interface::EmbeddedDisplayPort
        || interface == Interface::LVDS
        || interface == Interface::DSI
}

/// The mode flagged as preferred by the connector, or its first mode.
pub fn preferred_mode(conn_info: &connector::Info) -> Option<Mode> {
    let modes = conn_info.modes();
    modes
        .iter()
        .find(|mode| mode.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| modes.first())
        .copied()
}

pub fn mode_dimensions(mode: &Mode) -> (u32, u32) {
    let (width, height) = mode.size();
    (width as u32, height as u32)
}

/// CRTCs able to drive `connector`, the one it is currently routed through first.
pub fn possible_crtcs(
    device: &impl ControlDevice,
    connector: connector::Handle,
) -> io::Result<Vec<crtc::Handle>> {
    let res_handles = device.resource_handles()?;
    let conn_info = device.get_connector(connector, false)?;

    let mut crtcs = Vec::new();
    // We expect the previous drm master to leave the device in a sensible state,
    // so keep its routing to reduce flickering.
    if let Some(enc) = conn_info.current_encoder() {
        if let Some(crtc) = device.get_encoder(enc)?.crtc() {
            crtcs.push(crtc);
        }
    }

    for encoder_info in conn_info
        .encoders()
        .iter()
        .flat_map(|encoder_handle| device.get_encoder(*encoder_handle))
    {
        for crtc in res_handles.filter_crtcs(encoder_info.possible_crtcs()) {
            if !crtcs.contains(&crtc) {
                crtcs.push(crtc);
            }
        }
    }

    Ok(crtcs)
}
