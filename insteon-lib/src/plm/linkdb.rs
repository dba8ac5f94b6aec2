//! The modem's own All-Link database, managed with the find, modify and
//! delete sub-commands of ManageAllLinkRecord.

use super::{Packet, Plm, PlmCommand};
use crate::address::Address;
use crate::device::{AllLinkableDevice, LinkableDevice};
use crate::error::InsteonError;
use crate::link::{Group, LinkRecord};
use async_trait::async_trait;
use num_enum::IntoPrimitive;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Sub-commands of ManageAllLinkRecord (0x6f).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum LinkCommand {
    FindFirst = 0x00,
    FindNext = 0x01,
    ModFirst = 0x20,
    ModFirstCtrl = 0x40,
    ModFirstResp = 0x41,
    DeleteFirst = 0x80,
}

/// Mode byte of StartAllLink (0x64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum LinkingMode {
    Responder = 0x00,
    Controller = 0x01,
    Either = 0x03,
    Delete = 0xff,
}

const LINKING_RETRIES: usize = 3;

fn manage_record(command: LinkCommand, record: &LinkRecord) -> Packet {
    let mut payload = Vec::with_capacity(1 + LinkRecord::LEN);
    payload.push(command.into());
    payload.extend_from_slice(&record.to_bytes());
    Packet::new(PlmCommand::ManageAllLinkRecord, payload)
}

fn start_all_link(mode: LinkingMode, group: Group) -> Packet {
    Packet::new(PlmCommand::StartAllLink, vec![mode.into(), group.0])
}

/// Requested records bucketed by the group and address the modem deletes by.
fn by_target(records: &[LinkRecord]) -> Vec<(Group, Address, Vec<LinkRecord>)> {
    let mut targets: Vec<(Group, Address, Vec<LinkRecord>)> = Vec::new();
    for record in records {
        match targets
            .iter_mut()
            .find(|(group, address, _)| *group == record.group && *address == record.address)
        {
            Some((_, _, bucket)) => bucket.push(*record),
            None => targets.push((record.group, record.address, vec![*record])),
        }
    }
    targets
}

impl Plm {
    /// Read the whole modem database.
    pub async fn links(&self) -> Result<Vec<LinkRecord>, InsteonError> {
        let mut rx = self.subscribe(&[PlmCommand::AllLinkRecordResp]).await?;
        let mut links = Vec::new();

        debug!("retrieving PLM link database");
        match self.retry(Packet::command(PlmCommand::GetFirstAllLink), 0).await {
            Ok(_) => {}
            Err(InsteonError::Nak) => return Ok(links),
            Err(err) => return Err(err),
        }

        loop {
            let packet = match timeout(self.config().read_timeout, rx.recv()).await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Err(InsteonError::ConnectionClosed),
                Err(_) => return Err(InsteonError::ReadTimeout),
            };
            let link = LinkRecord::from_bytes(&packet.payload)?;
            debug!("PLM record {}", link);
            links.push(link);

            match self.send(Packet::command(PlmCommand::GetNextAllLink)).await {
                Ok(_) => {}
                Err(InsteonError::Nak) => return Ok(links),
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn add_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        let command = if record.flags.controller() {
            LinkCommand::ModFirstCtrl
        } else {
            LinkCommand::ModFirstResp
        };
        info!("adding PLM link {}", record);
        match self.send(manage_record(command, &record)).await {
            Ok(_) => Ok(()),
            Err(InsteonError::Nak) => Err(InsteonError::AddLinkFailed(record)),
            Err(err) => Err(err),
        }
    }

    /// Delete `records` from the modem.
    ///
    /// The modem deletes by group and address only, so records sharing both
    /// with a requested one are removed too. Those, and surplus copies beyond
    /// the number requested, are written back afterwards, also when a later
    /// delete fails.
    pub async fn remove_links(&self, records: &[LinkRecord]) -> Result<(), InsteonError> {
        let mut restore: Vec<LinkRecord> = Vec::new();
        let mut removed = 0usize;
        let mut failure = None;

        'targets: for (_, _, requested) in by_target(records) {
            let stored = match self.links().await {
                Ok(stored) => stored,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            let matches: Vec<LinkRecord> = stored
                .into_iter()
                .filter(|link| link.same_target(&requested[0]))
                .collect();
            // later copies answer the request first, so the earliest survives
            let mut unmatched = requested.clone();
            for link in matches.iter().rev() {
                match unmatched.iter().position(|r| r == link) {
                    Some(pos) => {
                        unmatched.swap_remove(pos);
                    }
                    None => restore.push(*link),
                }
            }

            for _ in 0..matches.len() {
                match self.send(manage_record(LinkCommand::DeleteFirst, &requested[0])).await {
                    Ok(_) => removed += 1,
                    Err(err) => {
                        warn!("failed to remove {}: {}", requested[0], err);
                        failure = Some(err);
                        break 'targets;
                    }
                }
            }
        }

        if removed == 0 || restore.is_empty() {
            return failure.map_or(Ok(()), Err);
        }

        let mut present = match self.links().await {
            Ok(present) => present,
            Err(err) => return Err(failure.unwrap_or(err)),
        };
        for link in restore {
            if let Some(pos) = present.iter().position(|l| *l == link) {
                present.swap_remove(pos);
                continue;
            }
            info!("restoring PLM link {}", link);
            if let Err(err) = self.add_link(link).await {
                failure.get_or_insert(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Remove every record that repeats an earlier one.
    pub async fn cleanup(&self) -> Result<(), InsteonError> {
        let links = self.links().await?;
        let removable: Vec<LinkRecord> = links
            .iter()
            .enumerate()
            .filter(|(i, link)| links[..*i].contains(*link))
            .map(|(_, link)| *link)
            .collect();
        if removable.is_empty() {
            return Ok(());
        }
        info!("removing {} duplicate PLM links", removable.len());
        self.remove_links(&removable).await
    }

    pub async fn enter_linking_mode(&self, group: Group) -> Result<(), InsteonError> {
        self.retry(start_all_link(LinkingMode::Either, group), LINKING_RETRIES)
            .await
            .map(|_| ())
    }

    pub async fn enter_unlinking_mode(&self, group: Group) -> Result<(), InsteonError> {
        self.retry(start_all_link(LinkingMode::Delete, group), LINKING_RETRIES)
            .await
            .map(|_| ())
    }

    pub async fn exit_linking_mode(&self) -> Result<(), InsteonError> {
        self.retry(Packet::command(PlmCommand::CancelAllLink), LINKING_RETRIES)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl LinkableDevice for Plm {
    async fn enter_linking_mode(&self, group: Group) -> Result<(), InsteonError> {
        Plm::enter_linking_mode(self, group).await
    }

    async fn enter_unlinking_mode(&self, group: Group) -> Result<(), InsteonError> {
        Plm::enter_unlinking_mode(self, group).await
    }

    async fn exit_linking_mode(&self) -> Result<(), InsteonError> {
        Plm::exit_linking_mode(self).await
    }

    async fn links(&self) -> Result<Vec<LinkRecord>, InsteonError> {
        Plm::links(self).await
    }

    async fn add_link(&self, record: LinkRecord) -> Result<(), InsteonError> {
        Plm::add_link(self, record).await
    }

    async fn remove_links(&self, records: &[LinkRecord]) -> Result<(), InsteonError> {
        Plm::remove_links(self, records).await
    }

    async fn write_link(&self, _record: LinkRecord) -> Result<(), InsteonError> {
        Err(InsteonError::NotImplemented)
    }
}

#[async_trait]
impl AllLinkableDevice for Plm {
    async fn assign_to_all_link_group(&self, _group: Group) -> Result<(), InsteonError> {
        Err(InsteonError::NotImplemented)
    }

    async fn delete_from_all_link_group(&self, _group: Group) -> Result<(), InsteonError> {
        Err(InsteonError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RecordControlFlags;

    #[test]
    fn manage_record_payload() {
        let record = LinkRecord::new(
            RecordControlFlags::USED_CONTROLLER,
            Group(1),
            Address::new(1, 2, 3),
            [0, 0, 0],
        );
        let packet = manage_record(LinkCommand::ModFirstCtrl, &record);
        assert_eq!(packet.command, PlmCommand::ManageAllLinkRecord);
        assert_eq!(packet.payload.as_ref(), &[0x40, 0xc0, 0x01, 0x01, 0x02, 0x03, 0, 0, 0]);
    }

    #[test]
    fn linking_mode_payload() {
        assert_eq!(start_all_link(LinkingMode::Either, Group(7)).payload.as_ref(), &[0x03, 0x07]);
        assert_eq!(start_all_link(LinkingMode::Delete, Group(7)).payload.as_ref(), &[0xff, 0x07]);
    }

    #[test]
    fn targets_group_by_group_and_address() {
        let a = Address::new(1, 2, 3);
        let b = Address::new(4, 5, 6);
        let records = [
            LinkRecord::new(RecordControlFlags::USED_CONTROLLER, Group(1), a, [0; 3]),
            LinkRecord::new(RecordControlFlags::USED_RESPONDER, Group(1), b, [0; 3]),
            LinkRecord::new(RecordControlFlags::USED_RESPONDER, Group(1), a, [0; 3]),
        ];
        let targets = by_target(&records);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].2.len(), 2);
        assert_eq!(targets[1].1, b);
    }
}
