//! Command Dispatcher
//!
//! One method per intent. Each builds its payload from the request and the
//! cached state, encodes it with the next message id, writes it to the
//! command characteristic and, once the write is acknowledged, applies the
//! commanded values to the cached state.

use crate::domain::models::{clamp_pct, DeviceState, Rgb};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::error::DeviceError;
use crate::infrastructure::bluetooth::protocol::{
    self, AnimationPayload, ColorPayload, ColorSchemePayload, CommandPacket,
    CustomizationPayload, NamePayload, PetalsPayload, StatePayload, MAX_COLOR_SCHEME_LEN,
};
use crate::infrastructure::bluetooth::transport::BleTransport;
use serde::Serialize;
use tracing::debug;

/// Longest transition the firmware accepts
pub const MAX_TRANSITION_MS: u32 = 60_000;

/// Animation speed bounds for the customization command
pub const MIN_ANIMATION_SPEED: i32 = 5;
pub const MAX_ANIMATION_SPEED: i32 = 255;

/// Scale one colour channel by a brightness percentage, rounding to nearest
pub fn scale_channel(value: u8, brightness_pct: u8) -> u8 {
    let pct = u32::from(brightness_pct.min(100));
    ((u32::from(value) * pct + 50) / 100) as u8
}

pub fn scale_rgb(rgb: Rgb, brightness_pct: u8) -> Rgb {
    Rgb::new(
        scale_channel(rgb.r, brightness_pct),
        scale_channel(rgb.g, brightness_pct),
        scale_channel(rgb.b, brightness_pct),
    )
}

/// Parameters for [`ConnectionManager::turn_on`]; unset fields keep the cached value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOn {
    pub rgb: Option<Rgb>,
    pub brightness: Option<i32>,
    pub petal_position: Option<i32>,
    pub transition_ms: Option<u32>,
}

/// Device-side configuration. Unset fields are not sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Customization {
    pub speed: Option<i32>,
    pub brightness: Option<i32>,
    pub max_open: Option<i32>,
}

impl Customization {
    fn to_payload(self) -> CustomizationPayload {
        CustomizationPayload {
            speed: self
                .speed
                .map(|speed| speed.clamp(MIN_ANIMATION_SPEED, MAX_ANIMATION_SPEED) as u8),
            brightness: self.brightness.map(clamp_pct),
            max_open: self.max_open.map(clamp_pct),
        }
    }
}

impl<T: BleTransport> ConnectionManager<T> {
    /// Turn the light on, optionally changing colour, brightness and petals
    pub async fn turn_on(&self, request: TurnOn) -> Result<(), DeviceError> {
        let transition_ms = self.transition(request.transition_ms);
        self.dispatch("turn on", self.config.commands.write_state, |state| {
            let rgb = request.rgb.unwrap_or_else(|| state.rgb());
            let brightness = request
                .brightness
                .map_or(state.brightness_pct(), clamp_pct);
            let petals = request
                .petal_position
                .map_or(state.petal_position_pct(), clamp_pct);
            let scaled = scale_rgb(rgb, brightness);

            let payload = StatePayload {
                petals,
                r: scaled.r,
                g: scaled.g,
                b: scaled.b,
                transition_ms,
            };
            (payload, move |state: &mut DeviceState| {
                state.set_rgb(rgb);
                state.set_brightness(i32::from(brightness));
                state.set_petal_position(i32::from(petals));
                state.set_power_on(true);
            })
        })
        .await
    }

    /// Blank the light, keeping the petals where they are
    pub async fn turn_off(&self, transition_ms: Option<u32>) -> Result<(), DeviceError> {
        let transition_ms = self.transition(transition_ms);
        self.dispatch("turn off", self.config.commands.write_state, |state| {
            let payload = StatePayload {
                petals: state.petal_position_pct(),
                r: 0,
                g: 0,
                b: 0,
                transition_ms,
            };
            (payload, |state: &mut DeviceState| state.set_power_on(false))
        })
        .await
    }

    /// Change colour at the current brightness
    pub async fn set_color(&self, rgb: Rgb, transition_ms: Option<u32>) -> Result<(), DeviceError> {
        let transition_ms = self.transition(transition_ms);
        self.dispatch("set color", self.config.commands.write_rgb_color, |state| {
            let scaled = scale_rgb(rgb, state.brightness_pct());
            let payload = ColorPayload {
                r: scaled.r,
                g: scaled.g,
                b: scaled.b,
                transition_ms,
            };
            (payload, move |state: &mut DeviceState| state.set_rgb(rgb))
        })
        .await
    }

    /// Move the petals to `level` percent open
    pub async fn set_petal_position(
        &self,
        level: i32,
        transition_ms: Option<u32>,
    ) -> Result<(), DeviceError> {
        let transition_ms = self.transition(transition_ms);
        let petals = clamp_pct(level);
        self.dispatch("set petals", self.config.commands.write_petals, |_| {
            let payload = PetalsPayload {
                petals,
                transition_ms,
            };
            (payload, move |state: &mut DeviceState| {
                state.set_petal_position(i32::from(petals))
            })
        })
        .await
    }

    /// Play a built-in animation; transient, so nothing is cached
    pub async fn play_animation(&self, animation: u8) -> Result<(), DeviceError> {
        self.dispatch("play animation", self.config.commands.play_animation, |_| {
            (AnimationPayload { animation }, |_: &mut DeviceState| {})
        })
        .await
    }

    /// Set the device's stored brightness configuration
    pub async fn set_brightness_config(&self, brightness: i32) -> Result<(), DeviceError> {
        self.set_customization(Customization {
            brightness: Some(brightness),
            ..Default::default()
        })
        .await
    }

    pub async fn set_customization(&self, customization: Customization) -> Result<(), DeviceError> {
        let payload = customization.to_payload();
        self.dispatch(
            "write customization",
            self.config.commands.write_customization,
            |_| (payload, |_: &mut DeviceState| {}),
        )
        .await
    }

    /// Rename the device. Names that do not fit in one packet are rejected.
    pub async fn set_name(&self, name: &str) -> Result<(), DeviceError> {
        let name = name.trim().to_string();
        self.dispatch("write name", self.config.commands.write_name, |_| {
            let applied = name.clone();
            (NamePayload { name }, move |state: &mut DeviceState| {
                state.set_display_name(&applied)
            })
        })
        .await
    }

    /// Store the palette used by the built-in animations.
    ///
    /// Only hue and saturation survive the encoding, so the cached scheme is
    /// what the lamp will report back rather than the colours passed in.
    pub async fn set_color_scheme(&self, colors: &[Rgb]) -> Result<(), DeviceError> {
        if colors.is_empty() || colors.len() > MAX_COLOR_SCHEME_LEN {
            return Err(DeviceError::InvalidColorScheme {
                count: colors.len(),
            });
        }

        let words: ColorSchemePayload = colors
            .iter()
            .map(|c| protocol::encode_hue_saturation(c.r, c.g, c.b))
            .collect();
        let stored: Vec<Rgb> = words
            .iter()
            .map(|word| Rgb::from(protocol::decode_hue_saturation(*word)))
            .collect();

        self.dispatch(
            "write color scheme",
            self.config.commands.write_color_scheme,
            |_| (words, move |state: &mut DeviceState| state.set_color_scheme(stored)),
        )
        .await
    }

    fn transition(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_transition_ms)
            .min(MAX_TRANSITION_MS)
    }

    async fn dispatch<P, A>(
        &self,
        intent: &str,
        command_type: u16,
        build: impl FnOnce(&DeviceState) -> (P, A),
    ) -> Result<(), DeviceError>
    where
        P: Serialize,
        A: FnOnce(&mut DeviceState),
    {
        let slot = self.link.lock().await;
        let (link, epoch) = self.live_link(&slot).map_err(|e| {
            debug!("Rejecting {} command: {}", intent, e);
            e
        })?;
        self.send_locked(link, epoch, intent, command_type, build)
            .await
    }

    /// Encode and write one command. The caller holds the link lock.
    pub(super) async fn send_locked<P, A>(
        &self,
        link: &T::Link,
        epoch: u64,
        intent: &str,
        command_type: u16,
        build: impl FnOnce(&DeviceState) -> (P, A),
    ) -> Result<(), DeviceError>
    where
        P: Serialize,
        A: FnOnce(&mut DeviceState),
    {
        let (packet, apply) = {
            let mut state = self.shared.state();
            let (payload, apply) = build(&state);
            let body = protocol::encode_payload(&payload)?;
            // Only successfully encoded packets consume a message id
            let message_id = state.issue_message_id();
            (CommandPacket::new(command_type, message_id, body), apply)
        };

        let bytes = packet.to_bytes();
        debug!(
            "Sending {} command type={} id={} packet={}",
            intent,
            packet.command_type,
            packet.message_id,
            protocol::hex(&bytes)
        );

        self.write_packet(link, epoch, &bytes).await?;
        apply(&mut self.shared.state());
        Ok(())
    }
}
