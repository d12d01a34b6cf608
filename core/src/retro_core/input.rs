//! Input port tree and host-side input state
//!
//! Cores describe their controls as ports, each holding axes (button or key
//! ids), each holding descriptors (indices). The host fills in the state of
//! every descriptor and answers `input_state` queries from it.

use std::collections::BTreeMap;

use smallvec::SmallVec;
use tracing::warn;

use crate::ffi::*;

/// One input of an axis (the `index` of an `input_state` query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    pub index: u32,
    pub description: String,
    pub state: i16,
}

/// A button, key or analog axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputAxis {
    pub id: u32,
    pub descriptors: BTreeMap<u32, InputDescriptor>,
}

impl InputAxis {
    fn new(id: u32) -> Self {
        Self { id, descriptors: BTreeMap::new() }
    }

    fn add(&mut self, index: u32, description: String) {
        self.descriptors
            .entry(index)
            .or_insert_with(|| InputDescriptor { index, description: String::new(), state: 0 })
            .description = description;
    }

    /// Drop descriptors without a description. Returns false if none remain.
    fn prune(&mut self) -> bool {
        self.descriptors.retain(|index, d| {
            if d.description.is_empty() {
                warn!("axis {}: empty desc[{}] (removed)", self.id, index);
                false
            } else {
                true
            }
        });
        !self.descriptors.is_empty()
    }

    fn set_state(&mut self, state: i16) {
        for d in self.descriptors.values_mut() {
            d.state = state;
        }
    }
}

/// A device type the core offers for a port (`SET_CONTROLLER_INFO`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChoice {
    pub device: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPort {
    pub port: u32,
    pub device: u32,
    pub axes: BTreeMap<u32, InputAxis>,
    pub choices: SmallVec<[PortChoice; 4]>,
    /// Device the core queried this port as, when different from `device`.
    pub hotplug_device: u32,
}

impl InputPort {
    fn new(port: u32, device: u32) -> Self {
        Self {
            port,
            device,
            axes: BTreeMap::new(),
            choices: SmallVec::new(),
            hotplug_device: RETRO_DEVICE_NONE,
        }
    }

    /// Add `prefix_N` descriptors for every id in `ids` the core did not list.
    fn fill_missing(&mut self, ids: impl Iterator<Item = u32>, prefix: &str) {
        for id in ids {
            self.axes.entry(id).or_insert_with(|| {
                let mut axis = InputAxis::new(id);
                axis.add(0, format!("{prefix}_{id}"));
                axis
            });
        }
    }

    fn prune(&mut self) -> bool {
        let port = self.port;
        self.axes.retain(|id, axis| {
            let keep = axis.prune();
            if !keep {
                warn!("port {}: invalid axis {} (removed)", port, id);
            }
            keep
        });
        !self.axes.is_empty()
    }
}

/// Mouse position and button as seen by the host window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseState {
    pub x: i16,
    pub y: i16,
    /// Pointer is over the game area.
    pub inside: bool,
    pub button: bool,
}

/// Why an `input_state` query could not be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputLookupError {
    #[error("input_state({port}/{device}/{index}/{id}): port not found")]
    NoPort { port: u32, device: u32, index: u32, id: u32 },
    #[error("input_state({port}/{device}/{index}/{id}): axis not found")]
    NoAxis { port: u32, device: u32, index: u32, id: u32 },
    #[error("input_state({port}/{device}/{index}/{id}): index not found")]
    NoIndex { port: u32, device: u32, index: u32, id: u32 },
}

/// All input a core can observe.
#[derive(Debug, Clone)]
pub struct InputState {
    ports: BTreeMap<u32, InputPort>,
    keys: Vec<i16>,
    key_to_joypad: Vec<(usize, u32)>,
    map_keys_to_joypad: bool,
    has_keyboard: bool,
    mouse: MouseState,
    emulated_mouse: (i16, i16),
}

impl Default for InputState {
    fn default() -> Self {
        Self::new(true, Vec::new())
    }
}

impl InputState {
    pub fn new(map_keys_to_joypad: bool, key_to_joypad: Vec<(usize, u32)>) -> Self {
        Self {
            ports: BTreeMap::new(),
            keys: vec![0; RETROK_LAST],
            key_to_joypad,
            map_keys_to_joypad,
            has_keyboard: false,
            mouse: MouseState::default(),
            emulated_mouse: (0, 0),
        }
    }

    pub fn ports(&self) -> &BTreeMap<u32, InputPort> {
        &self.ports
    }

    pub fn has_keyboard(&self) -> bool {
        self.has_keyboard
    }

    pub(crate) fn clear_ports(&mut self) {
        self.ports.clear();
    }

    /// Record one `SET_INPUT_DESCRIPTORS` entry.
    pub fn add_descriptor(
        &mut self,
        port: u32,
        device: u32,
        index: u32,
        id: u32,
        description: &str,
    ) {
        self.ports
            .entry(port)
            .or_insert_with(|| InputPort::new(port, device))
            .axes
            .entry(id)
            .or_insert_with(|| InputAxis::new(id))
            .add(index, description.to_string());
    }

    /// Set the device choices of port `port` (`SET_CONTROLLER_INFO`),
    /// replacing any earlier list.
    pub fn set_port_choices(&mut self, port: u32, choices: &[(u32, String)]) {
        let Some(&(first, _)) = choices.first() else {
            return;
        };
        let entry = self
            .ports
            .entry(port)
            .or_insert_with(|| InputPort::new(port, first & RETRO_DEVICE_MASK));
        entry.choices = choices
            .iter()
            .map(|(device, description)| PortChoice {
                device: *device,
                description: description.clone(),
            })
            .collect();
    }

    /// Complete and validate the port tree after a game is loaded.
    pub fn map_input(&mut self) {
        self.has_keyboard = false;
        let mut has_keyboard = false;
        self.ports.retain(|&num, port| {
            let valid = match port.device {
                RETRO_DEVICE_NONE => {
                    warn!("map_input: port {} null device ignored", num);
                    true
                }
                RETRO_DEVICE_JOYPAD => {
                    port.fill_missing(0..=RETRO_DEVICE_ID_JOYPAD_R3, "joypad");
                    true
                }
                RETRO_DEVICE_KEYBOARD => {
                    if has_keyboard {
                        warn!("map_input: port {} - multiple keyboards not supported", num);
                    } else {
                        has_keyboard = true;
                        port.fill_missing(0..RETROK_LAST as u32, "key");
                    }
                    true
                }
                RETRO_DEVICE_ANALOG => {
                    warn!("map_input: port {} analog device not implemented", num);
                    true
                }
                RETRO_DEVICE_MOUSE | RETRO_DEVICE_LIGHTGUN | RETRO_DEVICE_POINTER => true,
                other => {
                    warn!("map_input: port {} unknown device {} (removed)", num, other);
                    false
                }
            };
            if valid && port.prune() {
                true
            } else {
                warn!("map_input: invalid port {} (removed)", num);
                false
            }
        });
        self.has_keyboard = has_keyboard;
    }

    /// Set every descriptor of `port`/`id`. Missing ports or axes are logged and ignored.
    pub fn update_joypad(&mut self, port: u32, id: u32, state: i16) {
        let Some(p) = self.ports.get_mut(&port) else {
            warn!("update_joypad(port {}, id {}, {}): no port", port, id, state);
            return;
        };
        let Some(axis) = p.axes.get_mut(&id) else {
            warn!("update_joypad(port {}, id {}, {}): no axis", port, id, state);
            return;
        };
        axis.set_state(state);
    }

    pub fn set_key(&mut self, key: usize, pressed: bool) {
        if let Some(k) = self.keys.get_mut(key) {
            *k = i16::from(pressed);
        }
    }

    pub fn key(&self, key: usize) -> i16 {
        self.keys.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn clear_keys(&mut self) {
        self.keys.fill(0);
    }

    pub fn set_mouse(&mut self, mouse: MouseState) {
        self.mouse = mouse;
    }

    pub fn set_map_keys_to_joypad(&mut self, on: bool) {
        self.map_keys_to_joypad = on;
    }

    /// Push host key state into the port tree (`input_poll`).
    ///
    /// With key mapping on, mapped keys drive the first joypad port.
    /// Otherwise key state is copied to the keyboard port.
    pub fn poll(&mut self) {
        if !self.map_keys_to_joypad {
            for port in self.ports.values_mut().filter(|p| p.device == RETRO_DEVICE_KEYBOARD) {
                for axis in port.axes.values_mut() {
                    match self.keys.get(axis.id as usize) {
                        Some(&state) => axis.set_state(state),
                        None => warn!("port {} key {} invalid", port.port, axis.id),
                    }
                }
            }
            return;
        }

        let Some(port) = self.ports.values_mut().find(|p| p.device == RETRO_DEVICE_JOYPAD) else {
            return;
        };
        for &(key, button) in &self.key_to_joypad {
            let state = self.keys.get(key).copied().unwrap_or(0);
            if let Some(axis) = port.axes.get_mut(&button) {
                axis.set_state(state);
            }
        }
    }

    /// Answer an `input_state` query.
    pub fn query(
        &mut self,
        port: u32,
        device: u32,
        index: u32,
        id: u32,
    ) -> Result<i16, InputLookupError> {
        let mouse = self.mouse;
        let p = self
            .ports
            .get_mut(&port)
            .ok_or(InputLookupError::NoPort { port, device, index, id })?;
        if device != p.device {
            if device == RETRO_DEVICE_JOYPAD || device == RETRO_DEVICE_NONE {
                return Ok(0);
            }
            p.hotplug_device = device;
            return Ok(hotplug_state(device, index, id, mouse, &mut self.emulated_mouse));
        }
        let axis = p.axes.get(&id).ok_or(InputLookupError::NoAxis { port, device, index, id })?;
        axis.descriptors
            .get(&index)
            .map(|d| d.state)
            .ok_or(InputLookupError::NoIndex { port, device, index, id })
    }
}

/// Emulate a mouse, lightgun or pointer from the host mouse.
fn hotplug_state(
    device: u32,
    index: u32,
    id: u32,
    mouse: MouseState,
    last: &mut (i16, i16),
) -> i16 {
    match device {
        RETRO_DEVICE_MOUSE => match id {
            RETRO_DEVICE_ID_MOUSE_X => {
                let d = mouse.x.wrapping_sub(last.0);
                last.0 = mouse.x;
                d
            }
            RETRO_DEVICE_ID_MOUSE_Y => {
                let d = mouse.y.wrapping_sub(last.1);
                last.1 = mouse.y;
                d
            }
            RETRO_DEVICE_ID_MOUSE_LEFT => i16::from(mouse.button),
            _ => 0,
        },
        RETRO_DEVICE_LIGHTGUN => match id {
            RETRO_DEVICE_ID_LIGHTGUN_SCREEN_X if mouse.inside => mouse.x,
            RETRO_DEVICE_ID_LIGHTGUN_SCREEN_Y if mouse.inside => mouse.y,
            RETRO_DEVICE_ID_LIGHTGUN_SCREEN_X | RETRO_DEVICE_ID_LIGHTGUN_SCREEN_Y => i16::MIN,
            RETRO_DEVICE_ID_LIGHTGUN_IS_OFFSCREEN => i16::from(!mouse.inside),
            RETRO_DEVICE_ID_LIGHTGUN_TRIGGER => i16::from(mouse.button),
            _ => 0,
        },
        // Only the first finger exists.
        RETRO_DEVICE_POINTER if index != 0 => 0,
        RETRO_DEVICE_POINTER => match id {
            RETRO_DEVICE_ID_POINTER_X => mouse.x,
            RETRO_DEVICE_ID_POINTER_Y => mouse.y,
            RETRO_DEVICE_ID_POINTER_PRESSED => i16::from(mouse.button),
            RETRO_DEVICE_ID_POINTER_COUNT => i16::from(mouse.inside),
            _ => 0,
        },
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joypad_state() -> InputState {
        let mut input = InputState::new(true, vec![(65, RETRO_DEVICE_ID_JOYPAD_A)]);
        input.add_descriptor(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_A, "A");
        input.add_descriptor(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_B, "B");
        input.map_input();
        input
    }

    // ============================================================================
    // Port tree
    // ============================================================================

    #[test]
    fn test_joypad_fills_all_buttons() {
        let input = joypad_state();
        let port = &input.ports()[&0];
        assert_eq!(port.axes.len(), 16);
        assert_eq!(port.axes[&RETRO_DEVICE_ID_JOYPAD_A].descriptors[&0].description, "A");
        assert_eq!(port.axes[&RETRO_DEVICE_ID_JOYPAD_UP].descriptors[&0].description, "joypad_4");
    }

    #[test]
    fn test_keyboard_fills_keys_once() {
        let mut input = InputState::default();
        input.add_descriptor(0, RETRO_DEVICE_KEYBOARD, 0, 13, "Return");
        input.add_descriptor(1, RETRO_DEVICE_KEYBOARD, 0, 13, "Return");
        input.map_input();
        assert!(input.has_keyboard());
        assert_eq!(input.ports()[&0].axes.len(), RETROK_LAST);
        assert_eq!(input.ports()[&0].axes[&32].descriptors[&0].description, "key_32");
        // The second keyboard keeps only what the core declared.
        assert_eq!(input.ports()[&1].axes.len(), 1);
    }

    #[test]
    fn test_map_input_prunes() {
        let mut input = InputState::default();
        // Unknown device type is removed.
        input.add_descriptor(0, 99, 0, 0, "weird");
        // Mouse port with only an empty description is pruned to nothing.
        input.add_descriptor(1, RETRO_DEVICE_MOUSE, 0, 0, "");
        // Mouse port with one good and one empty descriptor survives.
        input.add_descriptor(2, RETRO_DEVICE_MOUSE, 0, 0, "X");
        input.add_descriptor(2, RETRO_DEVICE_MOUSE, 1, 0, "");
        input.map_input();
        assert_eq!(input.ports().keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(input.ports()[&2].axes[&0].descriptors.len(), 1);
    }

    #[test]
    fn test_controller_info_choices() {
        let mut input = InputState::default();
        let choices = vec![
            (RETRO_DEVICE_JOYPAD, "Gamepad".to_string()),
            ((1 << RETRO_DEVICE_TYPE_SHIFT) | RETRO_DEVICE_JOYPAD, "Zapper".to_string()),
        ];
        input.set_port_choices(0, &choices);
        input.set_port_choices(1, &[]);
        assert_eq!(input.ports()[&0].device, RETRO_DEVICE_JOYPAD);
        assert_eq!(input.ports()[&0].choices.len(), 2);
        assert!(!input.ports().contains_key(&1));

        // A second announcement replaces the list.
        input.set_port_choices(0, &choices[..1]);
        assert_eq!(input.ports()[&0].choices.len(), 1);
        assert_eq!(input.ports()[&0].choices[0].description, "Gamepad");
    }

    // ============================================================================
    // State
    // ============================================================================

    #[test]
    fn test_key_to_joypad_mapping() {
        let mut input = joypad_state();
        input.set_key(65, true);
        input.poll();
        assert_eq!(input.query(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_A), Ok(1));
        input.set_key(65, false);
        input.poll();
        assert_eq!(input.query(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_A), Ok(0));
    }

    #[test]
    fn test_keys_copied_to_keyboard_when_unmapped() {
        let mut input = InputState::new(false, Vec::new());
        input.add_descriptor(0, RETRO_DEVICE_KEYBOARD, 0, 13, "Return");
        input.map_input();
        input.set_key(13, true);
        input.poll();
        assert_eq!(input.query(0, RETRO_DEVICE_KEYBOARD, 0, 13), Ok(1));
    }

    #[test]
    fn test_update_joypad_and_lookup_errors() {
        let mut input = joypad_state();
        input.update_joypad(0, RETRO_DEVICE_ID_JOYPAD_START, 1);
        input.update_joypad(7, 0, 1);
        assert_eq!(input.query(0, RETRO_DEVICE_JOYPAD, 0, RETRO_DEVICE_ID_JOYPAD_START), Ok(1));
        let joypad = |input: &mut InputState, port, index, id| {
            input.query(port, RETRO_DEVICE_JOYPAD, index, id)
        };
        assert!(matches!(joypad(&mut input, 5, 0, 0), Err(InputLookupError::NoPort { .. })));
        assert!(matches!(joypad(&mut input, 0, 0, 99), Err(InputLookupError::NoAxis { .. })));
        assert!(matches!(joypad(&mut input, 0, 3, 0), Err(InputLookupError::NoIndex { .. })));
    }

    #[test]
    fn test_hotplug_mouse_reports_deltas() {
        let mut input = joypad_state();
        input.set_mouse(MouseState { x: 10, y: 5, inside: true, button: true });
        assert_eq!(input.query(0, RETRO_DEVICE_MOUSE, 0, RETRO_DEVICE_ID_MOUSE_X), Ok(10));
        assert_eq!(input.query(0, RETRO_DEVICE_MOUSE, 0, RETRO_DEVICE_ID_MOUSE_X), Ok(0));
        assert_eq!(input.query(0, RETRO_DEVICE_MOUSE, 0, RETRO_DEVICE_ID_MOUSE_LEFT), Ok(1));
        assert_eq!(input.ports()[&0].hotplug_device, RETRO_DEVICE_MOUSE);
    }

    #[test]
    fn test_hotplug_lightgun_offscreen() {
        let mut input = joypad_state();
        input.set_mouse(MouseState { x: 3, y: 4, inside: false, button: false });
        let gun = |input: &mut InputState, id| input.query(0, RETRO_DEVICE_LIGHTGUN, 0, id);
        assert_eq!(gun(&mut input, RETRO_DEVICE_ID_LIGHTGUN_SCREEN_X), Ok(i16::MIN));
        assert_eq!(gun(&mut input, RETRO_DEVICE_ID_LIGHTGUN_IS_OFFSCREEN), Ok(1));
        input.set_mouse(MouseState { x: 3, y: 4, inside: true, button: false });
        assert_eq!(gun(&mut input, RETRO_DEVICE_ID_LIGHTGUN_SCREEN_Y), Ok(4));
    }

    #[test]
    fn test_hotplug_pointer_second_finger() {
        let mut input = joypad_state();
        input.set_mouse(MouseState { x: 3, y: 4, inside: true, button: true });
        assert_eq!(input.query(0, RETRO_DEVICE_POINTER, 0, RETRO_DEVICE_ID_POINTER_X), Ok(3));
        assert_eq!(input.query(0, RETRO_DEVICE_POINTER, 1, RETRO_DEVICE_ID_POINTER_X), Ok(0));
    }

    #[test]
    fn test_joypad_query_on_other_device_port() {
        let mut input = InputState::default();
        input.add_descriptor(0, RETRO_DEVICE_MOUSE, 0, 0, "X");
        input.map_input();
        assert_eq!(input.query(0, RETRO_DEVICE_JOYPAD, 0, 0), Ok(0));
        assert_eq!(input.ports()[&0].hotplug_device, RETRO_DEVICE_NONE);
    }
}
