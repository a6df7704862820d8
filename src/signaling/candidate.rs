use crate::errors::SignalingError;

/// A remote ICE candidate taken from a trickle fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Candidate attribute value including the `candidate:` prefix.
    pub candidate: String,
    /// Media line identifier from the closest preceding `a=mid:` line.
    pub sdp_mid: Option<String>,
}

const MID_PREFIX: &str = "a=mid:";
const CANDIDATE_PREFIX: &str = "a=candidate:";

/// Parse an `application/trickle-ice-sdpfrag` body.
///
/// Candidates come back in the order they appear, each tagged with the most
/// recently seen mid. Lines other than `a=mid:` and `a=candidate:` are
/// ignored. Some clients send the fragment with escaped `\r\n` sequences
/// instead of real line breaks; those are decoded first.
pub fn parse_ice_candidates(fragment: &str) -> Result<Vec<IceCandidate>, SignalingError> {
    let decoded = fragment.replace("\\r\\n", "\r\n");

    let mut mid: Option<String> = None;
    let mut candidates = Vec::new();

    for line in decoded.lines() {
        let line = line.trim_end_matches('\r').trim();
        if let Some(value) = line.strip_prefix(MID_PREFIX) {
            mid = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(CANDIDATE_PREFIX) {
            validate_candidate(value)?;
            candidates.push(IceCandidate {
                candidate: format!("candidate:{}", value),
                sdp_mid: mid.clone(),
            });
        }
    }

    Ok(candidates)
}

/// `foundation component transport priority address port typ type [...]`
fn validate_candidate(value: &str) -> Result<(), SignalingError> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(SignalingError::BadRequest(format!(
            "candidate has {} fields, expected at least 8: {}",
            fields.len(),
            value
        )));
    }
    if fields[6] != "typ" {
        return Err(SignalingError::BadRequest(format!(
            "candidate is missing 'typ': {}",
            value
        )));
    }
    if fields[1].parse::<u16>().is_err()
        || fields[3].parse::<u32>().is_err()
        || fields[5].parse::<u16>().is_err()
    {
        return Err(SignalingError::BadRequest(format!(
            "candidate has a non-numeric component, priority or port: {}",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "a=candidate:1 1 udp 2130706431 192.168.1.20 54400 typ host";
    const SRFLX: &str =
        "a=candidate:2 1 udp 1694498815 203.0.113.7 61000 typ srflx raddr 192.168.1.20 rport 54400";

    #[test]
    fn test_candidates_keep_order_and_mid() {
        let body = format!("a=ice-ufrag:abcd\r\na=mid:0\r\n{}\r\n{}\r\n", HOST, SRFLX);
        let parsed = parse_ice_candidates(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].candidate.starts_with("candidate:1 1 udp"));
        assert!(parsed[1].candidate.starts_with("candidate:2 1 udp"));
        assert_eq!(parsed[0].sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed[1].sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_mid_changes_apply_to_following_candidates() {
        let body = format!("{}\na=mid:video\n{}\n", HOST, SRFLX);
        let parsed = parse_ice_candidates(&body).unwrap();
        assert_eq!(parsed[0].sdp_mid, None);
        assert_eq!(parsed[1].sdp_mid.as_deref(), Some("video"));
    }

    #[test]
    fn test_escaped_line_breaks_are_decoded() {
        let body = format!("a=mid:0\\r\\n{}\\r\\na=end-of-candidates", HOST);
        let parsed = parse_ice_candidates(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_fragment_without_candidates() {
        let parsed = parse_ice_candidates("a=mid:0\r\na=end-of-candidates\r\n").unwrap();
        assert!(parsed.is_empty());
        assert!(parse_ice_candidates("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_candidates_are_rejected() {
        for bad in [
            "a=candidate:1 1 udp 2130706431 192.168.1.20",
            "a=candidate:1 1 udp 2130706431 192.168.1.20 54400 kind host",
            "a=candidate:1 one udp 2130706431 192.168.1.20 54400 typ host",
            "a=candidate:1 1 udp 2130706431 192.168.1.20 port typ host",
        ] {
            let result = parse_ice_candidates(bad);
            assert!(
                matches!(result, Err(SignalingError::BadRequest(_))),
                "accepted {}",
                bad
            );
        }
    }
}
