//! SIP session state.

use crate::identity::msisdn::{self, NormalizedMsisdn};
use crate::message::MessageKind;
use crate::types::Timestamp;
use serde::Serialize;

/// Media line summary lifted from an SDP body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SdpMedia {
    /// "audio" or "video".
    pub kind: String,
    pub connection_ip: String,
    pub port: u16,
}

/// One parsed SIP message as delivered by the decoder.
#[derive(Debug, Clone)]
pub struct SipMessage {
    pub frame_number: u32,
    pub timestamp: Timestamp,
    pub kind: MessageKind,
    /// Response status code; `None` for requests.
    pub status_code: Option<u16>,
    pub call_id: String,
    pub from_uri: String,
    pub to_uri: String,
    pub p_asserted_identity: Option<String>,
    pub contact: Option<String>,
    /// Host from the topmost Via header.
    pub via_ip: Option<String>,
    pub record_route: Vec<String>,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub expires: Option<u32>,
    /// IMS Charging Identifier from P-Charging-Vector.
    pub icid: Option<String>,
    pub sdp_media: Vec<SdpMedia>,
}

impl SipMessage {
    pub fn new(frame_number: u32, timestamp: Timestamp, kind: MessageKind, call_id: &str) -> Self {
        SipMessage {
            frame_number,
            timestamp,
            kind,
            status_code: None,
            call_id: call_id.to_string(),
            from_uri: String::new(),
            to_uri: String::new(),
            p_asserted_identity: None,
            contact: None,
            via_ip: None,
            record_route: Vec::new(),
            src_ip: String::new(),
            src_port: 0,
            dst_ip: String::new(),
            dst_port: 0,
            expires: None,
            icid: None,
            sdp_media: Vec::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.status_code.is_none()
    }
}

/// Classified type of a SIP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SipSessionType {
    Registration,
    Deregistration,
    VoiceCall,
    VideoCall,
    EmergencyCall,
    CallForwarding,
    SmsMessage,
    Other,
    Unknown,
}

/// SIP dialog progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

/// All messages sharing one Call-ID, plus the state extracted from them.
#[derive(Debug, Clone)]
pub struct SipSession {
    pub call_id: String,
    /// Intra-correlator id, `<timestamp>_S_<seq>`.
    pub intra_correlator: String,
    pub messages: Vec<SipMessage>,
    pub session_type: SipSessionType,
    pub dialog_state: DialogState,

    pub caller_uri: String,
    pub callee_uri: String,
    pub caller_msisdn: NormalizedMsisdn,
    pub callee_msisdn: NormalizedMsisdn,
    /// From the topmost Via of the first request.
    pub caller_ip: String,
    /// From the SDP c= line of the answering message.
    pub callee_ip: String,
    pub icid: Option<String>,
    pub sdp_media: Vec<SdpMedia>,
    pub record_route: Vec<String>,

    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl SipSession {
    pub fn new(call_id: &str, intra_correlator: String) -> Self {
        SipSession {
            call_id: call_id.to_string(),
            intra_correlator,
            messages: Vec::new(),
            session_type: SipSessionType::Unknown,
            dialog_state: DialogState::Early,
            caller_uri: String::new(),
            callee_uri: String::new(),
            caller_msisdn: NormalizedMsisdn::default(),
            callee_msisdn: NormalizedMsisdn::default(),
            caller_ip: String::new(),
            callee_ip: String::new(),
            icid: None,
            sdp_media: Vec::new(),
            record_route: Vec::new(),
            start_time: Timestamp::default(),
            end_time: Timestamp::default(),
            start_frame: 0,
            end_frame: 0,
        }
    }

    pub fn add_message(&mut self, msg: SipMessage) {
        self.update_time_window(&msg);
        self.extract_parties(&msg);
        self.extract_media(&msg);
        self.update_dialog_state(&msg);

        if self.icid.is_none() {
            self.icid = msg.icid.clone();
        }
        for route in &msg.record_route {
            if !self.record_route.contains(route) {
                self.record_route.push(route.clone());
            }
        }

        self.messages.push(msg);
    }

    /// Classifies the session. Run once, after all messages are in.
    pub fn finalize(&mut self) {
        let first_request = self.messages.iter().find(|m| m.is_request());
        let Some(first) = first_request else {
            self.session_type = SipSessionType::Unknown;
            return;
        };

        self.session_type = match first.kind {
            MessageKind::SipRegister => {
                if first.expires == Some(0) {
                    SipSessionType::Deregistration
                } else {
                    SipSessionType::Registration
                }
            }
            MessageKind::SipMessage => SipSessionType::SmsMessage,
            MessageKind::SipInvite => {
                if self.has_forwarding_indicator() {
                    SipSessionType::CallForwarding
                } else if self.sdp_media.iter().any(|m| m.kind == "video") {
                    SipSessionType::VideoCall
                } else if self.sdp_media.iter().any(|m| m.kind == "audio") {
                    SipSessionType::VoiceCall
                } else {
                    // INVITE without SDP in the capture still counts as a
                    // voice attempt.
                    SipSessionType::VoiceCall
                }
            }
            MessageKind::SipOptions | MessageKind::SipInfo | MessageKind::SipPublish => {
                SipSessionType::Other
            }
            _ => SipSessionType::Other,
        };
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.session_type,
            SipSessionType::VoiceCall
                | SipSessionType::VideoCall
                | SipSessionType::EmergencyCall
                | SipSessionType::CallForwarding
        )
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Arrival time of the first message of the given kind.
    pub fn first_time_of(&self, kind: MessageKind) -> Option<Timestamp> {
        self.messages
            .iter()
            .find(|m| m.kind == kind)
            .map(|m| m.timestamp)
    }

    /// Frame numbers of every message in the session.
    pub fn frame_numbers(&self) -> Vec<u32> {
        self.messages.iter().map(|m| m.frame_number).collect()
    }

    fn update_time_window(&mut self, msg: &SipMessage) {
        if self.start_time.is_unset() || msg.timestamp < self.start_time {
            self.start_time = msg.timestamp;
            self.start_frame = msg.frame_number;
        }
        if msg.timestamp > self.end_time {
            self.end_time = msg.timestamp;
            self.end_frame = msg.frame_number;
        }
    }

    fn extract_parties(&mut self, msg: &SipMessage) {
        if self.caller_uri.is_empty() && !msg.from_uri.is_empty() {
            self.caller_uri = msg.from_uri.clone();
            self.caller_msisdn = msisdn::normalize(&msg.from_uri);
        }
        if self.callee_uri.is_empty() && !msg.to_uri.is_empty() {
            self.callee_uri = msg.to_uri.clone();
            self.callee_msisdn = msisdn::normalize(&msg.to_uri);
        }
        if self.caller_ip.is_empty() && msg.is_request() {
            if let Some(via) = &msg.via_ip {
                self.caller_ip = via.clone();
            } else if !msg.src_ip.is_empty() {
                self.caller_ip = msg.src_ip.clone();
            }
        }
        if self.callee_ip.is_empty() && !msg.is_request() {
            if let Some(media) = msg.sdp_media.first() {
                self.callee_ip = media.connection_ip.clone();
            }
        }
    }

    fn extract_media(&mut self, msg: &SipMessage) {
        for media in &msg.sdp_media {
            if !self.sdp_media.contains(media) {
                self.sdp_media.push(media.clone());
            }
        }
    }

    fn update_dialog_state(&mut self, msg: &SipMessage) {
        match msg.kind {
            MessageKind::SipOk if self.dialog_state == DialogState::Early => {
                self.dialog_state = DialogState::Confirmed;
            }
            MessageKind::SipBye | MessageKind::SipCancel => {
                self.dialog_state = DialogState::Terminated;
            }
            _ => {}
        }
    }

    fn has_forwarding_indicator(&self) -> bool {
        self.messages.iter().any(|m| {
            m.status_code.map_or(false, |code| (300..400).contains(&code))
                || m.contact
                    .as_deref()
                    .map_or(false, |contact| contact.contains(";isub="))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(frame: u32, millis: i64) -> SipMessage {
        let mut msg = SipMessage::new(
            frame,
            Timestamp::from_millis(millis),
            MessageKind::SipInvite,
            "abc@d",
        );
        msg.from_uri = "sip:+14155551234@ims.example.com".to_string();
        msg.to_uri = "sip:+14155555678@ims.example.com".to_string();
        msg.via_ip = Some("10.100.1.50".to_string());
        msg.sdp_media.push(SdpMedia {
            kind: "audio".to_string(),
            connection_ip: "10.100.1.50".to_string(),
            port: 49170,
        });
        msg
    }

    fn response(frame: u32, millis: i64, kind: MessageKind, code: u16) -> SipMessage {
        let mut msg = SipMessage::new(frame, Timestamp::from_millis(millis), kind, "abc@d");
        msg.status_code = Some(code);
        msg
    }

    #[test]
    fn test_voice_call_classification() {
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(invite(1, 0));
        session.add_message(response(2, 50, MessageKind::SipTrying, 100));
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::VoiceCall);
        assert!(session.is_call());
    }

    #[test]
    fn test_video_call_classification() {
        let mut msg = invite(1, 0);
        msg.sdp_media.push(SdpMedia {
            kind: "video".to_string(),
            connection_ip: "10.100.1.50".to_string(),
            port: 49172,
        });
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(msg);
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::VideoCall);
    }

    #[test]
    fn test_registration_and_deregistration() {
        let mut reg = SipMessage::new(
            1,
            Timestamp::from_millis(0),
            MessageKind::SipRegister,
            "reg-1",
        );
        reg.expires = Some(3600);
        let mut session = SipSession::new("reg-1", "0.000000_S_1".to_string());
        session.add_message(reg);
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::Registration);

        let mut dereg = SipMessage::new(
            1,
            Timestamp::from_millis(0),
            MessageKind::SipRegister,
            "reg-2",
        );
        dereg.expires = Some(0);
        let mut session = SipSession::new("reg-2", "0.000000_S_2".to_string());
        session.add_message(dereg);
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::Deregistration);
    }

    #[test]
    fn test_sms_classification() {
        let msg = SipMessage::new(
            1,
            Timestamp::from_millis(0),
            MessageKind::SipMessage,
            "sms-1",
        );
        let mut session = SipSession::new("sms-1", "0.000000_S_1".to_string());
        session.add_message(msg);
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::SmsMessage);
    }

    #[test]
    fn test_forwarding_on_3xx() {
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(invite(1, 0));
        session.add_message(response(2, 100, MessageKind::Unknown, 302));
        session.finalize();
        assert_eq!(session.session_type, SipSessionType::CallForwarding);
    }

    #[test]
    fn test_party_extraction() {
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(invite(1, 0));
        assert_eq!(session.caller_msisdn.international, "14155551234");
        assert_eq!(session.callee_msisdn.international, "14155555678");
        assert_eq!(session.caller_ip, "10.100.1.50");
    }

    #[test]
    fn test_dialog_state_progression() {
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(invite(1, 0));
        assert_eq!(session.dialog_state, DialogState::Early);
        session.add_message(response(2, 3000, MessageKind::SipOk, 200));
        assert_eq!(session.dialog_state, DialogState::Confirmed);
        let bye = SipMessage::new(
            3,
            Timestamp::from_millis(303_000),
            MessageKind::SipBye,
            "abc@d",
        );
        session.add_message(bye);
        assert_eq!(session.dialog_state, DialogState::Terminated);
    }

    #[test]
    fn test_time_window() {
        let mut session = SipSession::new("abc@d", "0.000000_S_1".to_string());
        session.add_message(invite(5, 1000));
        session.add_message(response(9, 4000, MessageKind::SipOk, 200));
        assert_eq!(session.start_time, Timestamp::from_millis(1000));
        assert_eq!(session.end_time, Timestamp::from_millis(4000));
        assert_eq!(session.start_frame, 5);
        assert_eq!(session.end_frame, 9);
    }
}
