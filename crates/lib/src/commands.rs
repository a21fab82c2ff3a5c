//! Named commands built on [`Tv::command`]
//!
//! Nothing here touches session internals; every method is a thin wrapper
//! around the generic command call plus, where the reply is interesting, a
//! typed view of the payload.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::client::Tv;
use crate::error::SessionError;
use crate::input::POINTER_INPUT_SOCKET_URI;

/// Known command endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ServiceList,
    ForegroundApp,
    ListApps,
    GetVolume,
    SetVolume,
    VolumeUp,
    VolumeDown,
    SetMute,
    FastForward,
    Pause,
    Play,
    Rewind,
    Stop,
    CloseApp,
    AppState,
    LaunchApp,
    OpenApp,
    CreateToast,
    TurnOff,
    ChannelUp,
    ChannelDown,
    ChannelList,
    CurrentChannel,
    CurrentProgram,
    PointerInputSocket,
    EnterKey,
}

impl Command {
    /// Wire URI for this command
    pub fn uri(&self) -> &'static str {
        match self {
            Command::ServiceList => "ssap://api/getServiceList",
            Command::ForegroundApp => "ssap://com.webos.applicationManager/getForegroundAppInfo",
            Command::ListApps => "ssap://com.webos.applicationManager/listApps",
            Command::GetVolume => "ssap://audio/getVolume",
            Command::SetVolume => "ssap://audio/setVolume",
            Command::VolumeUp => "ssap://audio/volumeUp",
            Command::VolumeDown => "ssap://audio/volumeDown",
            Command::SetMute => "ssap://audio/setMute",
            Command::FastForward => "ssap://media.controls/fastForward",
            Command::Pause => "ssap://media.controls/pause",
            Command::Play => "ssap://media.controls/play",
            Command::Rewind => "ssap://media.controls/rewind",
            Command::Stop => "ssap://media.controls/stop",
            Command::CloseApp => "ssap://system.launcher/close",
            Command::AppState => "ssap://system.launcher/getAppState",
            Command::LaunchApp => "ssap://system.launcher/launch",
            Command::OpenApp => "ssap://system.launcher/open",
            Command::CreateToast => "ssap://system.notifications/createToast",
            Command::TurnOff => "ssap://system/turnOff",
            Command::ChannelUp => "ssap://tv/channelUp",
            Command::ChannelDown => "ssap://tv/channelDown",
            Command::ChannelList => "ssap://tv/getChannelList",
            Command::CurrentChannel => "ssap://tv/getCurrentChannel",
            Command::CurrentProgram => "ssap://tv/getChannelProgramInfo",
            Command::PointerInputSocket => POINTER_INPUT_SOCKET_URI,
            Command::EnterKey => "ssap://com.webos.service.ime/sendEnterKey",
        }
    }
}

/// Audio output volume
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(default)]
    pub scenario: Option<String>,
    pub volume: i64,
    #[serde(default)]
    pub muted: bool,
}

/// An installed or running application
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(alias = "id")]
    pub app_id: String,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub window_id: Option<String>,
    #[serde(default)]
    pub process_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceList {
    #[serde(default)]
    pub services: Vec<Service>,
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, SessionError> {
    serde_json::from_value(payload).map_err(|e| SessionError::UnexpectedPayload(e.to_string()))
}

impl Tv {
    /// Run a named command
    pub fn run(&self, command: Command, payload: Option<Value>) -> Result<Value, SessionError> {
        self.command(command.uri(), payload)
    }

    fn run_unit(&self, command: Command, payload: Option<Value>) -> Result<(), SessionError> {
        self.run(command, payload).map(|_| ())
    }

    pub fn service_list(&self) -> Result<ServiceList, SessionError> {
        decode(self.run(Command::ServiceList, None)?)
    }

    /// Application currently in the foreground
    pub fn current_app(&self) -> Result<App, SessionError> {
        decode(self.run(Command::ForegroundApp, None)?)
    }

    pub fn list_apps(&self) -> Result<Vec<App>, SessionError> {
        #[derive(Deserialize)]
        struct Apps {
            #[serde(default)]
            apps: Vec<App>,
        }
        decode::<Apps>(self.run(Command::ListApps, None)?).map(|a| a.apps)
    }

    pub fn volume(&self) -> Result<Volume, SessionError> {
        let payload = self.run(Command::GetVolume, None)?;
        // Newer firmware nests the fields under volumeStatus
        match payload.get("volumeStatus") {
            Some(status) => decode(status.clone()),
            None => decode(payload),
        }
    }

    pub fn set_volume(&self, volume: u8) -> Result<(), SessionError> {
        self.run_unit(Command::SetVolume, Some(json!({ "volume": volume })))
    }

    pub fn volume_up(&self) -> Result<(), SessionError> {
        self.run_unit(Command::VolumeUp, None)
    }

    pub fn volume_down(&self) -> Result<(), SessionError> {
        self.run_unit(Command::VolumeDown, None)
    }

    pub fn mute(&self) -> Result<(), SessionError> {
        self.run_unit(Command::SetMute, Some(json!({ "mute": true })))
    }

    pub fn unmute(&self) -> Result<(), SessionError> {
        self.run_unit(Command::SetMute, Some(json!({ "mute": false })))
    }

    pub fn fast_forward(&self) -> Result<(), SessionError> {
        self.run_unit(Command::FastForward, None)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.run_unit(Command::Pause, None)
    }

    pub fn play(&self) -> Result<(), SessionError> {
        self.run_unit(Command::Play, None)
    }

    pub fn rewind(&self) -> Result<(), SessionError> {
        self.run_unit(Command::Rewind, None)
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.run_unit(Command::Stop, None)
    }

    pub fn close_app(&self, app_id: &str) -> Result<(), SessionError> {
        self.run_unit(Command::CloseApp, Some(json!({ "id": app_id })))
    }

    pub fn app_state(&self, app_id: &str) -> Result<Value, SessionError> {
        self.run(Command::AppState, Some(json!({ "id": app_id })))
    }

    pub fn launch_app(&self, app_id: &str) -> Result<(), SessionError> {
        self.run_unit(Command::LaunchApp, Some(json!({ "id": app_id })))
    }

    /// Launch with app-specific parameters (e.g. `contentTarget`)
    pub fn launch_app_with(&self, app_id: &str, params: Value) -> Result<(), SessionError> {
        self.run_unit(
            Command::LaunchApp,
            Some(json!({ "id": app_id, "params": params })),
        )
    }

    /// Bring a previously launched app to the foreground
    pub fn open_app(&self, app_id: &str) -> Result<(), SessionError> {
        self.run_unit(Command::OpenApp, Some(json!({ "id": app_id })))
    }

    /// Show a toast notification
    pub fn notify(&self, message: &str) -> Result<(), SessionError> {
        self.run_unit(Command::CreateToast, Some(json!({ "message": message })))
    }

    pub fn turn_off(&self) -> Result<(), SessionError> {
        self.run_unit(Command::TurnOff, None)
    }

    pub fn channel_up(&self) -> Result<(), SessionError> {
        self.run_unit(Command::ChannelUp, None)
    }

    pub fn channel_down(&self) -> Result<(), SessionError> {
        self.run_unit(Command::ChannelDown, None)
    }

    pub fn channel_list(&self) -> Result<Value, SessionError> {
        self.run(Command::ChannelList, None)
    }

    pub fn current_channel(&self) -> Result<Value, SessionError> {
        self.run(Command::CurrentChannel, None)
    }

    /// Programme info for the current channel
    pub fn current_program(&self) -> Result<Value, SessionError> {
        self.run(Command::CurrentProgram, None)
    }

    /// IME enter, as opposed to the ENTER remote button
    pub fn key_ok(&self) -> Result<Value, SessionError> {
        self.run(Command::EnterKey, None)
    }

    pub fn key_up(&self) -> Result<(), SessionError> {
        self.send_button("UP")
    }

    pub fn key_down(&self) -> Result<(), SessionError> {
        self.send_button("DOWN")
    }

    pub fn key_left(&self) -> Result<(), SessionError> {
        self.send_button("LEFT")
    }

    pub fn key_right(&self) -> Result<(), SessionError> {
        self.send_button("RIGHT")
    }

    pub fn key_enter(&self) -> Result<(), SessionError> {
        self.send_button("ENTER")
    }

    pub fn key_back(&self) -> Result<(), SessionError> {
        self.send_button("BACK")
    }

    pub fn key_home(&self) -> Result<(), SessionError> {
        self.send_button("HOME")
    }
}
