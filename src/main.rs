use ens_chat::config::Config;
use ens_chat::copy::{self, ClipboardError, CopyFeedback, CopyKey};
use ens_chat::diagnostics;
use ens_chat::message::{Message as ChatMessage, MessageId, Role};
use ens_chat::render::{self, MessageRenderer, Pipeline, Segment};
use ens_chat::scroll::{ScrollAction, ScrollMetrics, ScrollState};
use ens_chat::session::{ChatSession, ChatStatus};
use ens_chat::status::{self, LoadingIndicator};
use ens_chat::transport::{ChatTransport, StreamEvent};

use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{button, column, container, row, scrollable, text, text_input, text_input::Id},
    window, Element, Font, Length, Subscription, Task, Theme,
};
use std::time::Instant;

fn main() -> iced::Result {
    diagnostics::init_logging();
    let config = Config::load();

    iced::application("ENS Docs Chat", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            min_size: Some(iced::Size::new(
                config.window.min_width as f32,
                config.window.min_height as f32,
            )),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    Stream(StreamEvent),
    Scrolled(scrollable::Viewport),
    Tick,
    CopyCode(MessageId, usize),
    Copied(CopyKey, Result<(), ClipboardError>),
    Exit,
}

struct App {
    input_text: String,
    session: ChatSession,
    transport: ChatTransport,
    renderer: MessageRenderer<Pipeline>,
    scroll: ScrollState,
    indicator: LoadingIndicator,
    feedback: CopyFeedback,
    input_id: Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: Config) -> (Self, Task<Message>) {
        tracing::debug!("Chat backend at {}", config.backend.endpoint);

        let input_id = Id::unique();
        let app = App {
            input_text: String::new(),
            session: ChatSession::new(config.backend.customer_id),
            transport: ChatTransport::new(config.backend.endpoint),
            renderer: MessageRenderer::new(Pipeline::new(config.render)),
            scroll: ScrollState::new(),
            indicator: LoadingIndicator::new(),
            feedback: CopyFeedback::new(),
            input_id: input_id.clone(),
            scroll_id: scrollable::Id::unique(),
        };

        (app, text_input::focus(input_id))
    }

    /// Re-render after the message list changed and follow the bottom if the
    /// scroll policy says so.
    fn refresh(&mut self) -> Task<Message> {
        let summary = self.renderer.render(self.session.messages());
        if summary.failed > 0 {
            tracing::debug!("{} message(s) shown unformatted", summary.failed);
        }

        match self.scroll.after_render(self.session.messages()) {
            ScrollAction::ToBottom => {
                scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
            }
            ScrollAction::Preserve => Task::none(),
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let Some(request) = self.session.submit(&self.input_text) else {
                    return Task::none();
                };
                self.input_text.clear();
                self.indicator.reset();

                let stream = Task::run(self.transport.open(request), Message::Stream);
                Task::batch([self.refresh(), stream])
            }
            Message::Stream(event) => {
                self.session.apply(event);
                self.refresh()
            }
            Message::Scrolled(viewport) => {
                self.scroll.on_scroll(ScrollMetrics {
                    offset_y: viewport.absolute_offset().y,
                    viewport_height: viewport.bounds().height,
                    content_height: viewport.content_bounds().height,
                });
                Task::none()
            }
            Message::Tick => {
                if self.session.status() == ChatStatus::Submitted {
                    self.indicator.tick();
                }
                self.feedback.expire(Instant::now());
                Task::none()
            }
            Message::CopyCode(id, index) => {
                let Some(code) = self.renderer.code_text(&id, index) else {
                    tracing::warn!("No code block {index} in message {id}");
                    return Task::none();
                };
                let key = CopyKey {
                    message: id,
                    block: index,
                };
                Task::perform(copy::write_async(code.to_string()), move |result| {
                    Message::Copied(key.clone(), result)
                })
            }
            Message::Copied(key, result) => {
                self.feedback.record(key, result, Instant::now());
                Task::none()
            }
            Message::Exit => iced::exit(),
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let animating =
            self.session.status() == ChatStatus::Submitted || self.feedback.is_active();
        let timer = if animating {
            time::every(status::TICK).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn message_view<'a>(&'a self, message: &'a ChatMessage, now: Instant) -> Element<'a, Message> {
        let author = match message.role {
            Role::User => "You",
            Role::Assistant => "ENS Assistant",
            Role::System => "System",
        };
        let mut body = column![text(author).size(12)].spacing(6);

        match self.renderer.display(message) {
            render::Display::Plain(content) | render::Display::Raw(content) => {
                body = body.push(text(content).size(15));
            }
            render::Display::Html(formatted) => {
                for segment in formatted.segments() {
                    body = match segment {
                        Segment::Text(prose) => body.push(text(prose).size(15)),
                        Segment::Code { index, text: code } => {
                            body.push(self.code_view(&message.id, index, code, now))
                        }
                    };
                }
            }
        }

        body.into()
    }

    fn code_view(
        &self,
        id: &MessageId,
        index: usize,
        code: String,
        now: Instant,
    ) -> Element<'static, Message> {
        let key = CopyKey {
            message: id.clone(),
            block: index,
        };
        let label = if self.feedback.is_confirmed(&key, now) {
            "Copied!"
        } else {
            "Copy"
        };

        let copy_button = container(
            button(text(label).size(12))
                .on_press(Message::CopyCode(id.clone(), index))
                .padding(4),
        )
        .width(Length::Fill)
        .align_x(alignment::Horizontal::Right);

        column![
            copy_button,
            container(text(code).font(Font::MONOSPACE).size(13))
                .padding(8)
                .width(Length::Fill)
                .style(container::rounded_box),
        ]
        .spacing(2)
        .into()
    }

    fn view(&self) -> Element<Message> {
        let now = Instant::now();

        let mut list = column![].spacing(14).padding(15).width(Length::Fill);
        for message in self.session.messages() {
            list = list.push(self.message_view(message, now));
        }
        if self.session.status() == ChatStatus::Submitted {
            list = list.push(
                row![
                    text(self.indicator.spinner()).size(20),
                    text(self.indicator.phrase()).size(14)
                ]
                .spacing(10)
                .align_y(alignment::Vertical::Center),
            );
        }

        let messages = scrollable(list)
            .id(self.scroll_id.clone())
            .on_scroll(Message::Scrolled)
            .height(Length::Fill);

        let mut content = column![messages].spacing(10).padding(10);

        if self.session.status() == ChatStatus::Error {
            let reason = self.session.last_error().unwrap_or("unknown error");
            content = content.push(
                text(format!("Something went wrong: {reason}. Send again to retry."))
                    .size(13)
                    .style(text::danger),
            );
        }

        let input = text_input("Ask anything about ENS...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        content = content.push(input);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
