//! Control plane of the speaker function.
//!
//! Handles class-specific requests to the feature unit (mute and volume), alternate setting changes of the
//! streaming interface (playback start and stop), and bus state changes.
use embassy_usb::control::{InResponse, OutResponse, Recipient, Request, RequestType};
use embassy_usb::types::InterfaceNumber;
use embassy_usb::Handler;

use super::class_codes::*;
use crate::events::Events;
use crate::session::Session;
use crate::{MASTER_CHANNEL, MAX_VOLUME_8Q8_DB, MIN_VOLUME_8Q8_DB, VOLUME_RESOLUTION_8Q8_DB};

/// Size of the control transfer scratch buffer.
pub const SCRATCH_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestCode {
    SetCur,
    SetMin,
    SetMax,
    SetRes,
    GetCur,
    GetMin,
    GetMax,
    GetRes,
}

impl RequestCode {
    /// Get requests transfer data from the device to the host.
    pub const fn is_get(self) -> bool {
        matches!(
            self,
            RequestCode::GetCur | RequestCode::GetMin | RequestCode::GetMax | RequestCode::GetRes
        )
    }
}

impl TryFrom<u8> for RequestCode {
    type Error = Unhandled;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            SET_CUR => RequestCode::SetCur,
            SET_MIN => RequestCode::SetMin,
            SET_MAX => RequestCode::SetMax,
            SET_RES => RequestCode::SetRes,
            GET_CUR => RequestCode::GetCur,
            GET_MIN => RequestCode::GetMin,
            GET_MAX => RequestCode::GetMax,
            GET_RES => RequestCode::GetRes,
            _ => return Err(Unhandled::Request(code)),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlSelector {
    Mute,
    Volume,
}

impl TryFrom<u8> for ControlSelector {
    type Error = Unhandled;

    fn try_from(selector: u8) -> Result<Self, Self::Error> {
        match selector {
            MUTE_CONTROL => Ok(ControlSelector::Mute),
            VOLUME_CONTROL => Ok(ControlSelector::Volume),
            _ => Err(Unhandled::Control(selector)),
        }
    }
}

/// The channel a feature unit request applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// All channels at once. Payloads start with a placeholder value, followed by the left and right values.
    Master,
    Left,
    Right,
}

impl Channel {
    /// Index into the per-channel settings, `None` for the master channel.
    pub const fn index(self) -> Option<usize> {
        match self {
            Channel::Master => None,
            Channel::Left => Some(0),
            Channel::Right => Some(1),
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = Unhandled;

    fn try_from(channel: u8) -> Result<Self, Self::Error> {
        match channel {
            MASTER_CHANNEL => Ok(Channel::Master),
            1 => Ok(Channel::Left),
            2 => Ok(Channel::Right),
            _ => Err(Unhandled::Channel(channel)),
        }
    }
}

/// What to do with a feature unit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Receive a payload and apply it to the control, once the transfer completes.
    Apply(ControlSelector),
    /// Receive a payload and drop it.
    Discard,
    /// Send a constant value in every requested slot.
    Constant(i16),
    /// Send the current value of the control.
    Current(ControlSelector),
}

/// The request table of the feature unit. `None` for combinations that are not supported.
pub const fn action(request: RequestCode, control: ControlSelector) -> Option<Action> {
    use ControlSelector::*;
    use RequestCode::*;

    match (request, control) {
        (SetCur, control) => Some(Action::Apply(control)),
        (GetCur, control) => Some(Action::Current(control)),
        (SetMin | SetMax | SetRes, _) => Some(Action::Discard),
        (GetMin, Volume) => Some(Action::Constant(MIN_VOLUME_8Q8_DB)),
        (GetMax, Volume) => Some(Action::Constant(MAX_VOLUME_8Q8_DB)),
        (GetRes, Volume) => Some(Action::Constant(VOLUME_RESOLUTION_8Q8_DB)),
        (GetMin | GetMax | GetRes, Mute) => None,
    }
}

/// Reasons for not handling a control request. The USB stack stalls these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unhandled {
    Interface(u8),
    Entity(u8),
    Request(u8),
    Control(u8),
    Channel(u8),
    Unsupported(RequestCode, ControlSelector),
}

/// A class-specific request, addressed to an entity of an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRequest {
    pub interface: u8,
    pub entity: u8,
    pub request: u8,
    pub control: u8,
    pub channel: u8,
    pub length: u16,
}

impl From<&Request> for ControlRequest {
    fn from(req: &Request) -> Self {
        Self {
            interface: req.index as u8,
            entity: (req.index >> 8) as u8,
            request: req.request,
            control: (req.value >> 8) as u8,
            channel: req.value as u8,
            length: req.length,
        }
    }
}

/// The data stage of an accepted request.
#[derive(Debug, PartialEq, Eq)]
pub enum DataStage<'a> {
    /// The payload sent by the host goes here. Call [`ControlPlane::complete`] afterwards.
    Receive(&'a mut [u8]),
    /// Send this to the host.
    Transmit(&'a [u8]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pending {
    control: ControlSelector,
    channel: Channel,
}

/// Scratch buffer and target of the current control transfer.
struct ControlContext {
    scratch: [u8; SCRATCH_SIZE],
    pending: Option<Pending>,
}

impl ControlContext {
    const fn new() -> Self {
        Self {
            scratch: [0; SCRATCH_SIZE],
            pending: None,
        }
    }

    fn stage(&mut self, pending: Option<Pending>, length: u16) -> &mut [u8] {
        self.scratch = [0; SCRATCH_SIZE];
        self.pending = pending;

        let length = (length as usize).min(SCRATCH_SIZE);
        &mut self.scratch[..length]
    }
}

pub struct ControlPlane<'d> {
    session: &'d Session<'d>,
    context: ControlContext,
    configured: bool,
}

impl<'d> ControlPlane<'d> {
    pub const fn new(session: &'d Session<'d>) -> Self {
        Self {
            session,
            context: ControlContext::new(),
            configured: false,
        }
    }

    /// Accepts or rejects a feature unit request, and stages its data.
    pub fn dispatch(&mut self, request: &ControlRequest) -> Result<DataStage<'_>, Unhandled> {
        let config = self.session.config();

        if request.interface != config.control_interface {
            return Err(Unhandled::Interface(request.interface));
        }

        if request.entity != config.feature_unit_id {
            return Err(Unhandled::Entity(request.entity));
        }

        let code = RequestCode::try_from(request.request)?;
        let control = ControlSelector::try_from(request.control)?;
        let channel = Channel::try_from(request.channel)?;
        let action = action(code, control).ok_or(Unhandled::Unsupported(code, control))?;

        Ok(match action {
            Action::Apply(control) => {
                DataStage::Receive(self.context.stage(Some(Pending { control, channel }), request.length))
            }
            Action::Discard => DataStage::Receive(self.context.stage(None, request.length)),
            Action::Constant(value) => {
                let length = self.context.stage(None, request.length).len();
                let slot_count = length.div_ceil(2);

                for slot in self.context.scratch.chunks_exact_mut(2).take(slot_count) {
                    slot.copy_from_slice(&value.to_le_bytes());
                }

                DataStage::Transmit(&self.context.scratch[..length])
            }
            Action::Current(control) => {
                let settings = self.session.settings();
                let length = self.context.stage(None, request.length).len();

                let scratch = &mut self.context.scratch;
                match (control, channel.index()) {
                    (ControlSelector::Mute, None) => {
                        scratch[1] = settings.is_muted[0].into();
                        scratch[2] = settings.is_muted[1].into();
                    }
                    (ControlSelector::Mute, Some(index)) => {
                        scratch[0] = settings.is_muted[index].into();
                    }
                    (ControlSelector::Volume, None) => {
                        scratch[2..4].copy_from_slice(&settings.volume_8q8_db[0].to_le_bytes());
                        scratch[4..6].copy_from_slice(&settings.volume_8q8_db[1].to_le_bytes());
                    }
                    (ControlSelector::Volume, Some(index)) => {
                        scratch[0..2].copy_from_slice(&settings.volume_8q8_db[index].to_le_bytes());
                    }
                }

                DataStage::Transmit(&self.context.scratch[..length])
            }
        })
    }

    /// Finishes a received data stage of `received_len` bytes. Returns `true`, if a setting was applied.
    pub fn complete(&mut self, received_len: usize) -> bool {
        let Some(Pending { control, channel }) = self.context.pending.take() else {
            return false;
        };

        let data = &self.context.scratch[..received_len.min(SCRATCH_SIZE)];
        let volume_at = |offset: usize| i16::from_le_bytes([data[offset], data[offset + 1]]);

        let required_len = match (control, channel.index()) {
            (ControlSelector::Mute, None) => 3,
            (ControlSelector::Mute, Some(_)) => 1,
            (ControlSelector::Volume, None) => 6,
            (ControlSelector::Volume, Some(_)) => 2,
        };

        if data.len() < required_len {
            trace!("Dropped short {:?} payload of {} bytes", control, data.len());
            return false;
        }

        let settings = self.session.update_settings(|settings| match (control, channel.index()) {
            (ControlSelector::Mute, None) => {
                settings.is_muted = [data[1] != 0, data[2] != 0];
            }
            (ControlSelector::Mute, Some(index)) => {
                settings.is_muted[index] = data[0] != 0;
            }
            (ControlSelector::Volume, None) => {
                settings.volume_8q8_db = [volume_at(2), volume_at(4)];
            }
            (ControlSelector::Volume, Some(index)) => {
                settings.volume_8q8_db[index] = volume_at(0);
            }
        });

        match control {
            ControlSelector::Mute => {
                debug!("Mute set to {:?}", settings.is_muted);
                self.session.events().broadcast(Events::MUTE);
            }
            ControlSelector::Volume => {
                debug!("Volume set to {:?}", settings.volume_8q8_db);
                self.session.events().broadcast(Events::VOLUME);
            }
        }

        true
    }

    /// Starts playback on alternate setting 1 of the streaming interface, stops it on alternate setting 0.
    pub fn alternate_setting_changed(&mut self, interface: u8, alternate_setting: u8) {
        if interface != self.session.config().streaming_interface {
            return;
        }

        match alternate_setting {
            0 => {
                self.session.stop_playback();
            }
            1 => {
                self.session.start_playback();
            }
            _ => warn!("Unknown alternate setting {} of the streaming interface", alternate_setting),
        }
    }

    pub fn bus_reset(&mut self) {
        self.context = ControlContext::new();
        self.configured = false;
        self.session.stop_playback();
        self.session.usb_state_changed(false);
    }
}

impl<'d> Handler for ControlPlane<'d> {
    fn reset(&mut self) {
        debug!("USB reset");
        self.bus_reset();
    }

    fn addressed(&mut self, _addr: u8) {
        self.configured = false;
        self.session.usb_state_changed(false);
    }

    fn configured(&mut self, configured: bool) {
        self.configured = configured;
        self.session.usb_state_changed(configured);
    }

    // Suspend occurs, for example, when disconnecting the USB cable.
    fn suspended(&mut self, suspended: bool) {
        self.session.usb_state_changed(self.configured && !suspended);
    }

    fn set_alternate_setting(&mut self, iface: InterfaceNumber, alternate_setting: u8) {
        self.alternate_setting_changed(iface.into(), alternate_setting);
    }

    // Handle control set requests.
    fn control_out(&mut self, req: Request, data: &[u8]) -> Option<OutResponse> {
        if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
            return None;
        }

        if RequestCode::try_from(req.request).is_ok_and(RequestCode::is_get) {
            return None;
        }

        match self.dispatch(&ControlRequest::from(&req)) {
            Ok(DataStage::Receive(buffer)) => {
                let count = data.len().min(buffer.len());
                buffer[..count].copy_from_slice(&data[..count]);

                self.complete(count);
                Some(OutResponse::Accepted)
            }
            Ok(DataStage::Transmit(_)) => None,
            Err(unhandled) => {
                trace!("Unhandled set request: {:?}", unhandled);
                None
            }
        }
    }

    // Handle control get requests.
    fn control_in<'a>(&'a mut self, req: Request, _buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
            return None;
        }

        if !RequestCode::try_from(req.request).is_ok_and(RequestCode::is_get) {
            return None;
        }

        match self.dispatch(&ControlRequest::from(&req)) {
            Ok(DataStage::Transmit(data)) => Some(InResponse::Accepted(data)),
            Ok(DataStage::Receive(_)) => None,
            Err(unhandled) => {
                trace!("Unhandled get request: {:?}", unhandled);
                None
            }
        }
    }
}
