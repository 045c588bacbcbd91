//! Word-wide command/response channel between the consumer and the producer.
//!
//! Two 8-slot FIFOs carry `u32` words. A command is a code word followed by
//! its arguments; `SetConfig` is longer than the FIFO, so the client streams
//! it while the server reassembles it across polls. The client never
//! abandons a frame half way: a tail left behind by a timeout goes out
//! ahead of its next command, so the server's framing stays aligned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::config::{DecoderConfig, DecoderMode};
use crate::error::{DecoderError, Result};
use crate::ring_buffer::RingBuffer;
use crate::CONTROL_FIFO_DEPTH;

pub const CMD_STOP: u32 = 1;
pub const CMD_SET_CONFIG: u32 = 2;
pub const CMD_GET_DATA_BLOCK: u32 = 5;
pub const CMD_GET_SAMPLING_RATE: u32 = 6;
pub const CMD_SET_ADAPTIVE: u32 = 11;
pub const CMD_RESET: u32 = 12;

pub const RESP_ACK: u32 = 200;
pub const RESP_NACK: u32 = 201;
pub const RESP_DATA_BLOCK: u32 = 204;
pub const RESP_SAMPLING_RATE: u32 = 205;

/// `DATA_BLOCK` argument when nothing has been published yet
pub const NO_DATA_BLOCK: u32 = u32::MAX;

/// The low half of a command or response code word is the code, the high
/// half a tag the producer echoes back
const CODE_MASK: u32 = 0xFFFF;
const TAG_SHIFT: u32 = 16;

const SET_CONFIG_ARGS: usize = 8;
const MAX_COMMAND_WORDS: usize = 1 + SET_CONFIG_ARGS;

/// Consumer to producer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Stop,
    SetConfig(DecoderConfig),
    GetDataBlockIndex,
    GetSamplingRate,
    SetAdaptiveThreshold(bool),
    ResetDecoder,
}

/// Producer to consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nack,
    DataBlock(Option<usize>),
    SamplingRate(u32),
}

fn opt_bits(value: Option<f32>) -> u32 {
    value.unwrap_or(0.0).to_bits()
}

fn bits_opt(word: u32) -> Option<f32> {
    Some(f32::from_bits(word)).filter(|v| *v != 0.0)
}

impl Command {
    pub fn code(&self) -> u32 {
        match self {
            Command::Stop => CMD_STOP,
            Command::SetConfig(_) => CMD_SET_CONFIG,
            Command::GetDataBlockIndex => CMD_GET_DATA_BLOCK,
            Command::GetSamplingRate => CMD_GET_SAMPLING_RATE,
            Command::SetAdaptiveThreshold(_) => CMD_SET_ADAPTIVE,
            Command::ResetDecoder => CMD_RESET,
        }
    }

    pub fn encode(&self) -> Vec<u32> {
        let mut words = vec![self.code()];
        match self {
            Command::SetConfig(config) => words.extend([
                config.mode.id(),
                config.sample_rate,
                config.block_size as u32,
                config.bandwidth,
                opt_bits(config.cw_center),
                opt_bits(config.rtty_mark),
                opt_bits(config.rtty_shift),
                opt_bits(config.rtty_baud),
            ]),
            Command::SetAdaptiveThreshold(enabled) => words.push(u32::from(*enabled)),
            _ => {}
        }
        words
    }

    /// Argument words expected after `code`
    fn arg_count(code: u32) -> Result<usize> {
        match code {
            CMD_SET_CONFIG => Ok(SET_CONFIG_ARGS),
            CMD_SET_ADAPTIVE => Ok(1),
            CMD_STOP | CMD_GET_DATA_BLOCK | CMD_GET_SAMPLING_RATE | CMD_RESET => Ok(0),
            other => Err(DecoderError::ChannelProtocol(other)),
        }
    }

    /// Decode a complete command, code word first
    pub fn decode(words: &[u32]) -> Result<Self> {
        let (&code, args) = words.split_first().ok_or(DecoderError::ChannelProtocol(0))?;
        if args.len() != Self::arg_count(code)? {
            return Err(DecoderError::ChannelProtocol(code));
        }
        Ok(match code {
            CMD_STOP => Command::Stop,
            CMD_GET_DATA_BLOCK => Command::GetDataBlockIndex,
            CMD_GET_SAMPLING_RATE => Command::GetSamplingRate,
            CMD_RESET => Command::ResetDecoder,
            CMD_SET_ADAPTIVE => Command::SetAdaptiveThreshold(args[0] != 0),
            CMD_SET_CONFIG => Command::SetConfig(DecoderConfig {
                mode: DecoderMode::try_from(args[0])?,
                sample_rate: args[1],
                block_size: args[2] as usize,
                bandwidth: args[3],
                cw_center: bits_opt(args[4]),
                rtty_mark: bits_opt(args[5]),
                rtty_shift: bits_opt(args[6]),
                rtty_baud: bits_opt(args[7]),
            }),
            other => return Err(DecoderError::ChannelProtocol(other)),
        })
    }
}

impl Response {
    pub fn encode(&self) -> ([u32; 2], usize) {
        match *self {
            Response::Ack => ([RESP_ACK, 0], 1),
            Response::Nack => ([RESP_NACK, 0], 1),
            Response::DataBlock(index) => {
                let arg = index.and_then(|i| u32::try_from(i).ok()).unwrap_or(NO_DATA_BLOCK);
                ([RESP_DATA_BLOCK, arg], 2)
            }
            Response::SamplingRate(rate) => ([RESP_SAMPLING_RATE, rate], 2),
        }
    }

    /// Argument words following a response code
    fn arg_count(code: u32) -> Result<usize> {
        match code {
            RESP_ACK | RESP_NACK => Ok(0),
            RESP_DATA_BLOCK | RESP_SAMPLING_RATE => Ok(1),
            other => Err(DecoderError::ChannelProtocol(other)),
        }
    }

    fn decode(code: u32, arg: u32) -> Result<Self> {
        match code {
            RESP_ACK => Ok(Response::Ack),
            RESP_NACK => Ok(Response::Nack),
            RESP_DATA_BLOCK => Ok(Response::DataBlock((arg != NO_DATA_BLOCK).then_some(arg as usize))),
            RESP_SAMPLING_RATE => Ok(Response::SamplingRate(arg)),
            other => Err(DecoderError::ChannelProtocol(other)),
        }
    }
}

fn split_header(word: u32) -> (u32, u16) {
    (word & CODE_MASK, (word >> TAG_SHIFT) as u16)
}

struct ControlChannel {
    commands: RingBuffer<u32, CONTROL_FIFO_DEPTH>,
    responses: RingBuffer<u32, CONTROL_FIFO_DEPTH>,
}

/// Create a connected client (consumer side) and server (producer side)
pub fn control_channel() -> (ControlClient, ControlServer) {
    let channel = Arc::new(ControlChannel { commands: RingBuffer::new(), responses: RingBuffer::new() });
    (
        ControlClient {
            channel: Arc::clone(&channel),
            timeout: Duration::from_secs(1),
            last_tag: 0,
            unsent: Vec::new(),
            pending_header: None,
        },
        ControlServer {
            channel,
            pending: [0; MAX_COMMAND_WORDS],
            pending_len: 0,
            expected: 0,
            pending_tag: 0,
            reply_tag: 0,
        },
    )
}

/// Consumer side; every request blocks until the producer answers.
///
/// A request that times out may still reach the producer later. Its reply
/// carries the old tag and is skipped by whichever request reads it.
pub struct ControlClient {
    channel: Arc<ControlChannel>,
    timeout: Duration,
    last_tag: u16,
    /// Tail of a command whose push timed out; sent before the next command
    unsent: Vec<u32>,
    /// Response code word read without its argument
    pending_header: Option<u32>,
}

impl ControlClient {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait_word(&self, deadline: Instant) -> Result<u32> {
        loop {
            if let Some(word) = self.channel.responses.pop() {
                return Ok(word);
            }
            if Instant::now() >= deadline {
                return Err(DecoderError::Timeout);
            }
            std::thread::yield_now();
        }
    }

    /// Push `words`, spinning while the FIFO is full. On timeout, whatever
    /// is left of a frame already started is kept for the next request.
    fn push_words(&mut self, words: &[u32], mid_frame: bool, deadline: Instant) -> Result<()> {
        for (sent, &word) in words.iter().enumerate() {
            while self.channel.commands.push(word).is_err() {
                if Instant::now() >= deadline {
                    if mid_frame || sent > 0 {
                        self.unsent = words[sent..].to_vec();
                    }
                    return Err(DecoderError::Timeout);
                }
                std::thread::yield_now();
            }
        }
        Ok(())
    }

    /// Read one whole response: code, tag and argument
    fn read_response(&mut self, deadline: Instant) -> Result<(Response, u16)> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => self.wait_word(deadline)?,
        };
        let (code, tag) = split_header(header);
        let arg = match Response::arg_count(code)? {
            0 => 0,
            _ => match self.wait_word(deadline) {
                Ok(arg) => arg,
                Err(err) => {
                    self.pending_header = Some(header);
                    return Err(err);
                }
            },
        };
        Ok((Response::decode(code, arg)?, tag))
    }

    pub fn request(&mut self, command: Command) -> Result<Response> {
        let deadline = Instant::now() + self.timeout;

        if !self.unsent.is_empty() {
            let tail = std::mem::take(&mut self.unsent);
            debug!("Control: finishing an interrupted command, {} words left", tail.len());
            self.push_words(&tail, true, deadline)?;
        }

        self.last_tag = self.last_tag.wrapping_add(1);
        let tag = self.last_tag;
        let mut words = command.encode();
        words[0] |= u32::from(tag) << TAG_SHIFT;
        self.push_words(&words, false, deadline)?;

        loop {
            let (response, reply_tag) = self.read_response(deadline)?;
            if reply_tag == tag {
                return Ok(response);
            }
            trace!("Control: skipping {:?} for earlier request {}", response, reply_tag);
        }
    }

    fn expect_ack(&mut self, command: Command) -> Result<()> {
        match self.request(command)? {
            Response::Ack => Ok(()),
            Response::Nack => Err(DecoderError::InvalidConfig(format!("{:?} rejected", command))),
            other => Err(DecoderError::ChannelProtocol(other.encode().0[0])),
        }
    }

    pub fn set_config(&mut self, config: &DecoderConfig) -> Result<()> {
        self.expect_ack(Command::SetConfig(*config))
    }

    pub fn stop(&mut self) -> Result<()> {
        self.expect_ack(Command::Stop)
    }

    pub fn set_adaptive_threshold(&mut self, enabled: bool) -> Result<()> {
        self.expect_ack(Command::SetAdaptiveThreshold(enabled))
    }

    pub fn reset_decoder(&mut self) -> Result<()> {
        self.expect_ack(Command::ResetDecoder)
    }

    pub fn data_block_index(&mut self) -> Result<Option<usize>> {
        match self.request(Command::GetDataBlockIndex)? {
            Response::DataBlock(index) => Ok(index),
            other => Err(DecoderError::ChannelProtocol(other.encode().0[0])),
        }
    }

    pub fn sampling_rate(&mut self) -> Result<u32> {
        match self.request(Command::GetSamplingRate)? {
            Response::SamplingRate(rate) => Ok(rate),
            other => Err(DecoderError::ChannelProtocol(other.encode().0[0])),
        }
    }
}

/// Producer side; never blocks
pub struct ControlServer {
    channel: Arc<ControlChannel>,
    pending: [u32; MAX_COMMAND_WORDS],
    pending_len: usize,
    expected: usize,
    pending_tag: u16,
    /// Tag echoed by the next `respond`
    reply_tag: u16,
}

impl ControlServer {
    /// Take words that have arrived and return a command once one is
    /// complete. An unknown code is answered with NACK and reported.
    pub fn poll(&mut self) -> Result<Option<Command>> {
        while let Some(word) = self.channel.commands.pop() {
            if self.pending_len == 0 {
                let (code, tag) = split_header(word);
                self.pending_tag = tag;
                match Command::arg_count(code) {
                    Ok(args) => self.expected = 1 + args,
                    Err(err) => {
                        warn!("Control: unknown command word {}", word);
                        self.reply_tag = tag;
                        self.respond(Response::Nack);
                        return Err(err);
                    }
                }
                self.pending[0] = code;
            } else {
                self.pending[self.pending_len] = word;
            }
            self.pending_len += 1;

            if self.pending_len == self.expected {
                let words = &self.pending[..self.pending_len];
                self.pending_len = 0;
                self.reply_tag = self.pending_tag;
                return match Command::decode(words) {
                    Ok(command) => Ok(Some(command)),
                    Err(err) => {
                        self.respond(Response::Nack);
                        Err(err)
                    }
                };
            }
        }
        Ok(None)
    }

    /// Answer the last command. A response that does not fit whole is dropped.
    pub fn respond(&self, response: Response) {
        let (mut words, len) = response.encode();
        words[0] |= u32::from(self.reply_tag) << TAG_SHIFT;

        let responses = &self.channel.responses;
        if responses.capacity() - responses.len() < len {
            warn!("Control: response FIFO full, dropped {:?}", response);
            return;
        }
        for &word in &words[..len] {
            if responses.push(word).is_err() {
                warn!("Control: response FIFO full, dropped {:?}", response);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_config_words() {
        let config = DecoderConfig::rtty(8000, 2125.0, 170.0, 45.45);
        let words = Command::SetConfig(config).encode();
        assert_eq!(words.len(), 9);
        assert_eq!(words[0], CMD_SET_CONFIG);
        assert_eq!(words[1], 4);
        assert_eq!(words[5], 0, "missing CW center is sent as 0.0");
        assert_eq!(Command::decode(&words).unwrap(), Command::SetConfig(config));
    }

    #[test]
    fn test_decode_rejects_bad_words() {
        assert!(matches!(Command::decode(&[99]), Err(DecoderError::ChannelProtocol(99))));
        assert!(matches!(Command::decode(&[CMD_SET_ADAPTIVE]), Err(DecoderError::ChannelProtocol(11))));
        let mut words = Command::SetConfig(DecoderConfig::cw(4000, 800.0)).encode();
        words[1] = 7;
        assert!(matches!(Command::decode(&words), Err(DecoderError::UnknownMode(7))));
    }

    #[test]
    fn test_response_words() {
        assert_eq!(Response::DataBlock(None).encode(), ([RESP_DATA_BLOCK, u32::MAX], 2));
        assert_eq!(Response::DataBlock(Some(1)).encode(), ([RESP_DATA_BLOCK, 1], 2));
        assert_eq!(Response::Ack.encode().1, 1);
    }

    #[test]
    fn test_request_times_out_without_server() {
        let (client, _server) = control_channel();
        let mut client = client.with_timeout(Duration::from_millis(20));
        assert!(matches!(client.request(Command::Stop), Err(DecoderError::Timeout)));
    }

    #[test]
    fn test_server_poll_is_empty_when_idle() {
        let (_client, mut server) = control_channel();
        assert_eq!(server.poll().unwrap(), None);
    }

    #[test]
    fn test_round_trip_across_threads() {
        let (mut client, mut server) = control_channel();
        let config = DecoderConfig::cw(4000, 750.0);

        let producer = thread::spawn(move || {
            let mut served = Vec::new();
            while served.len() < 3 {
                if let Some(command) = server.poll().unwrap() {
                    let response = match command {
                        Command::GetSamplingRate => Response::SamplingRate(4000),
                        Command::GetDataBlockIndex => Response::DataBlock(Some(1)),
                        _ => Response::Ack,
                    };
                    served.push(command);
                    server.respond(response);
                }
                thread::yield_now();
            }
            served
        });

        client.set_config(&config).unwrap();
        assert_eq!(client.sampling_rate().unwrap(), 4000);
        assert_eq!(client.data_block_index().unwrap(), Some(1));

        let served = producer.join().unwrap();
        assert_eq!(served[0], Command::SetConfig(config));
        assert_eq!(served[1], Command::GetSamplingRate);
    }

    #[test]
    fn test_unknown_command_is_nacked() {
        let (client, mut server) = control_channel();
        client.channel.commands.push(42).unwrap();
        assert!(matches!(server.poll(), Err(DecoderError::ChannelProtocol(42))));
        assert_eq!(client.channel.responses.pop(), Some(RESP_NACK));
    }

    /// Serve commands on a thread the way the producer does, answering
    /// rate queries with the rate of the last accepted config
    fn spawn_server(mut server: ControlServer, count: usize) -> thread::JoinHandle<Vec<Command>> {
        thread::spawn(move || {
            let mut served = Vec::new();
            let mut rate = 0;
            while served.len() < count {
                match server.poll() {
                    Ok(Some(command)) => {
                        let response = match command {
                            Command::SetConfig(config) => {
                                rate = config.sample_rate;
                                Response::Ack
                            }
                            Command::GetSamplingRate => Response::SamplingRate(rate),
                            _ => Response::Ack,
                        };
                        served.push(command);
                        server.respond(response);
                    }
                    Ok(None) => thread::yield_now(),
                    Err(err) => panic!("server saw a broken frame: {}", err),
                }
            }
            served
        })
    }

    #[test]
    fn test_interrupted_set_config_keeps_framing() {
        let (client, server) = control_channel();
        let mut client = client.with_timeout(Duration::from_millis(20));
        let config = DecoderConfig::rtty(8000, 2125.0, 170.0, 45.45);

        // Nobody polls yet and SetConfig is longer than the FIFO
        assert!(matches!(client.set_config(&config), Err(DecoderError::Timeout)));

        let producer = spawn_server(server, 7);
        let mut client = client.with_timeout(Duration::from_secs(2));
        for _ in 0..4 {
            assert_eq!(client.sampling_rate().unwrap(), 8000);
        }
        client.set_config(&DecoderConfig::cw(4000, 800.0)).unwrap();
        assert_eq!(client.sampling_rate().unwrap(), 4000);

        let served = producer.join().unwrap();
        assert_eq!(served[0], Command::SetConfig(config), "interrupted config must arrive intact");
        assert!(served[1..5].iter().all(|c| *c == Command::GetSamplingRate));
    }

    #[test]
    fn test_late_reply_is_skipped() {
        let (client, mut server) = control_channel();
        let mut client = client.with_timeout(Duration::from_millis(20));
        assert!(matches!(client.sampling_rate(), Err(DecoderError::Timeout)));

        // The producer catches up and answers the query nobody waits for
        assert_eq!(server.poll().unwrap(), Some(Command::GetSamplingRate));
        server.respond(Response::SamplingRate(1234));

        let producer = spawn_server(server, 1);
        let mut client = client.with_timeout(Duration::from_secs(2));
        client.reset_decoder().unwrap();
        assert_eq!(producer.join().unwrap(), vec![Command::ResetDecoder]);
    }

    #[test]
    fn test_two_word_response_is_not_split() {
        let (client, server) = control_channel();
        for _ in 0..6 {
            client.channel.responses.push(RESP_ACK).unwrap();
        }
        server.respond(Response::SamplingRate(4000));
        assert_eq!(client.channel.responses.len(), 6, "only one slot was free");
        server.respond(Response::Ack);
        assert_eq!(client.channel.responses.len(), 7);
    }
}
