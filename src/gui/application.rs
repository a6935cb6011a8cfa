use futures::channel::mpsc::Sender;
use futures::SinkExt;
use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::executor;
use iced::theme::{self, Theme};
use iced::widget::{Column, button, column, container, horizontal_rule, row, scrollable, text};
use log::{debug, info, warn};
use tokio_util::sync::{CancellationToken};

use crate::config::io::{ConfigIO};
use crate::config::types::{Config, ConfigOverrides};
use crate::device::service::device_subscription;
use crate::device::types::{DeviceCommand, DeviceConfig, DeviceEvent, DeviceState};
use crate::error::AppRunError;
use crate::gui::list::{Highlight, ItemList, ListChange};
use crate::gui::style::{DeviceRowStyleSheet};
use crate::gui::types::{Message};

pub struct ApplicationFlags {
    pub config_io: ConfigIO,
    pub overrides: ConfigOverrides,
}

pub struct CWatchApplication {
    // this token is cancelled upon exit
    app_cancel: CancellationToken,

    // messages that the user must click away
    notices: Vec<String>,

    config_io: ConfigIO,
    config: Config,
    config_loaded: bool,
    overrides: ConfigOverrides,

    // None until the device service has started
    device_commands: Option<Sender<DeviceCommand>>,
    device_state: DeviceState,

    // names of the discovered devices, in the same order as the device service knows them
    devices: ItemList<String>,
    // the row of the device being synchronised
    highlight: Highlight,
    last_sync: Option<String>,
}

impl CWatchApplication {
    fn before_close(&mut self) {
        self.app_cancel.cancel();
    }

    fn load_config(&self) -> Command<Message> {
        let config_io = self.config_io.clone();

        Command::perform(
            async move { config_io.load().await },
            Message::ConfigLoadComplete,
        )
    }

    fn send_command(&self, command: DeviceCommand) -> Command<Message> {
        let Some(sender) = &self.device_commands else {
            warn!("Device service is not ready, dropping {:?}", command);
            return Command::none();
        };

        let mut sender = sender.clone();
        let fut = async move {
            sender.send(command).await.is_ok()
        };

        Command::perform(fut, Message::CommandSent)
    }

    fn send_config(&self) -> Command<Message> {
        if !self.config_loaded {
            return Command::none();
        }

        self.send_command(DeviceCommand::Configure(DeviceConfig::from(&self.config)))
    }

    fn on_list_change(&mut self, change: ListChange) {
        debug!("Device list {:?}", change);
        self.highlight.on_change(change);
    }

    fn on_device_state(&mut self, state: DeviceState) {
        if state != self.device_state {
            match state {
                DeviceState::Unavailable => self.notices.push(
                    "Bluetooth is not available. \
Make sure this computer has a Bluetooth adapter and that Bluetooth is switched on, \
then press \"Scan\" again.".to_string()
                ),
                DeviceState::NoPermission => self.notices.push(
                    "This application needs access to Bluetooth to find your watch and set its clock. \
Allow access to Bluetooth for this application in the privacy settings of your system, \
then press \"Scan\" again.".to_string()
                ),
                _ => {},
            }
        }

        if matches!(state, DeviceState::Syncing { .. }) {
            self.highlight.confirm();
        } else {
            self.highlight.clear();
        }

        self.device_state = state;
    }

    fn on_device_event(&mut self, event: DeviceEvent) -> Command<Message> {
        match event {
            DeviceEvent::Ready(sender) => {
                info!("Device service ready");
                self.device_commands = Some(sender);
                return self.send_config();
            },
            DeviceEvent::StateChange(state) => {
                self.on_device_state(state);
            },
            DeviceEvent::Discovered { index, name } => {
                if index <= self.devices.len() {
                    let change = self.devices.insert(index, name);
                    self.on_list_change(change);
                } else {
                    warn!("Discovered device at {} but only {} are listed", index, self.devices.len());
                }
            },
            DeviceEvent::Renamed { index, name } => {
                if index < self.devices.len() {
                    let change = self.devices.update(index, name);
                    self.on_list_change(change);
                }
            },
            DeviceEvent::SyncFinished { name, outcome } => {
                self.last_sync = Some(format!("{}: {}", name, outcome));
                self.highlight.clear();
            },
        }

        Command::none()
    }
}

impl Application for CWatchApplication {
    type Executor = executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (CWatchApplication, Command<Self::Message>) {
        let mut config = Config::default();
        flags.overrides.apply(&mut config);

        let app = CWatchApplication {
            app_cancel: CancellationToken::new(),
            notices: Vec::new(),
            config_io: flags.config_io,
            config,
            config_loaded: false,
            overrides: flags.overrides,
            device_commands: None,
            device_state: DeviceState::Initial,
            devices: ItemList::new(),
            highlight: Highlight::default(),
            last_sync: None,
        };

        let command = app.load_config();
        (app, command)
    }

    fn title(&self) -> String {
        String::from(concat!("CWatch Sync ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::ConfigLoadComplete((mut config, error_message)) => {
                info!("Config load complete");
                self.overrides.apply(&mut config);
                self.config = config;
                self.config_loaded = true;
                if let Some(error_message) = error_message {
                    self.notices.push(error_message);
                }
                return self.send_config();
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },
            Message::EventOccurred(_) => {},
            Message::DeviceEvent(event) => {
                return self.on_device_event(event);
            },
            Message::ScanPressed => {
                return self.send_command(DeviceCommand::StartScan);
            },
            Message::StopPressed => {
                return self.send_command(DeviceCommand::StopScan);
            },
            Message::DeviceSelected(index) => {
                let is_target = self.devices.get(index).map_or(false, |name| name == &self.config.target_name);
                let syncing = matches!(self.device_state, DeviceState::Syncing { .. });
                if is_target && !syncing {
                    self.highlight.request(index);
                }

                // the device service decides whether this selection leads anywhere
                return self.send_command(DeviceCommand::Select(index));
            },
            Message::CommandSent(sent) => {
                if !sent {
                    warn!("Device service stopped listening for commands");
                }
            },
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            event::listen().map(Message::EventOccurred),
            device_subscription(
                self.app_cancel.clone(),
                DeviceConfig::from(&self.config),
            ).map(Message::DeviceEvent),
        ])
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into()
        }

        let scanning = self.device_state == DeviceState::Scanning;

        let device_state = match &self.device_state {
            DeviceState::Initial => "".to_string(),
            DeviceState::Unavailable => "Bluetooth is not available".to_string(),
            DeviceState::NoPermission => "Not allowed to access Bluetooth!".to_string(),
            DeviceState::Idle if self.devices.is_empty() => "Press \"Scan\" to look for your watch".to_string(),
            DeviceState::Idle => format!("Select {} to set its clock", self.config.target_name),
            DeviceState::Scanning => "Scanning…".to_string(),
            DeviceState::Syncing { name } => format!("Setting the clock of {}…", name),
        };

        let mut scan_button = button(text("Scan")).style(theme::Button::Primary);
        if !scanning {
            scan_button = scan_button.on_press(Message::ScanPressed);
        }

        let mut stop_button = button(text("Stop")).style(theme::Button::Secondary);
        if scanning {
            stop_button = stop_button.on_press(Message::StopPressed);
        }

        let device_row = |index: usize, name: &String| {
            let row: Element<Message> = button(text(name))
                .width(Length::Fill)
                .style(theme::Button::Custom(Box::new(DeviceRowStyleSheet {
                    highlighted: self.highlight.row() == Some(index),
                })))
                .on_press(Message::DeviceSelected(index))
                .into();
            row
        };

        let last_sync = self.last_sync.clone().unwrap_or_default();

        container(
            column![
                text(device_state),

                row![scan_button, stop_button].spacing(20),

                horizontal_rule(10),

                scrollable(
                    Column::with_children(
                        self.devices
                            .iter()
                            .enumerate()
                            .map(|(index, name)| device_row(index, name))
                    )
                        .spacing(4)
                        .width(Length::Fill)
                )
                    .height(Length::Fill),

                horizontal_rule(10),

                text(last_sync).size(14),
            ]
                .spacing(20)
                .align_items(Alignment::Center),
        )
        .width(Length::Fill)
        .padding(20)
        .into()
    }
}

pub fn run_application(config_io: ConfigIO, overrides: ConfigOverrides) -> Result<(), AppRunError> {
    let flags = ApplicationFlags { config_io, overrides };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("cwatch-sync".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(400.0, 600.0);
    settings.window.resizable = true;

    // this function will call process::exit() unless there was a startup error
    CWatchApplication::run(settings)?;
    Ok(())
}
