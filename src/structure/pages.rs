//! Page tree enumeration.

use super::ObjectIndex;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use std::collections::HashSet;

/// Maximum nesting of `/Pages` nodes.
const MAX_PAGE_TREE_DEPTH: u32 = 64;

/// Page object references in document order.
pub fn page_refs(index: &ObjectIndex) -> Result<Vec<ObjectRef>> {
    let (_, catalog) = index.catalog()?;
    let root = catalog
        .get("Pages")
        .and_then(|p| p.as_reference())
        .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    collect_pages(index, root, 0, &mut visited, &mut pages)?;
    Ok(pages)
}

/// Number of pages in a document.
pub fn page_count(data: &[u8]) -> Result<usize> {
    let index = ObjectIndex::build(data)?;
    Ok(page_refs(&index)?.len())
}

fn collect_pages(
    index: &ObjectIndex,
    node: ObjectRef,
    depth: u32,
    visited: &mut HashSet<ObjectRef>,
    pages: &mut Vec<ObjectRef>,
) -> Result<()> {
    if depth > MAX_PAGE_TREE_DEPTH {
        return Err(Error::RecursionLimitExceeded(MAX_PAGE_TREE_DEPTH));
    }
    if !visited.insert(node) {
        return Err(Error::CircularReference(node));
    }

    let object = index.get_ref(node)?;
    let dict = object.as_dict().ok_or_else(|| Error::InvalidObjectType {
        expected: "Dictionary".to_string(),
        found: object.type_name().to_string(),
    })?;

    match (object.dict_type(), dict.get("Kids")) {
        (Some("Page"), _) => pages.push(node),
        (Some("Pages"), Some(kids)) | (None, Some(kids)) => {
            let kids = index.resolve(kids)?.as_array().ok_or_else(|| {
                Error::InvalidPdf(format!("/Kids of page node {} is not an array", node))
            })?;
            for kid in kids {
                match kid {
                    Object::Reference(r) => collect_pages(index, *r, depth + 1, visited, pages)?,
                    other => {
                        return Err(Error::InvalidPdf(format!(
                            "page tree node {} has a direct {} kid",
                            node,
                            other.type_name()
                        )))
                    },
                }
            }
        },
        _ => {
            return Err(Error::InvalidPdf(format!("object {} is not a page tree node", node)));
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Vec<u8> {
        format!("%PDF-1.7\n{}trailer\n<< /Size 9 /Root 1 0 R >>\n%%EOF\n", body).into_bytes()
    }

    #[test]
    fn test_nested_page_tree_order() {
        let data = doc("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 >>\nendobj\n\
3 0 obj\n<< /Type /Pages /Kids [5 0 R 6 0 R] /Count 2 >>\nendobj\n\
4 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n\
5 0 obj\n<< /Type /Page /Parent 3 0 R >>\nendobj\n\
6 0 obj\n<< /Type /Page /Parent 3 0 R >>\nendobj\n");
        let index = ObjectIndex::build(&data).unwrap();
        let ids: Vec<u32> = page_refs(&index).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 6, 4]);
        assert_eq!(page_count(&data).unwrap(), 3);
    }

    #[test]
    fn test_cyclic_page_tree() {
        let data = doc("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [2 0 R] /Count 1 >>\nendobj\n");
        let index = ObjectIndex::build(&data).unwrap();
        assert!(matches!(page_refs(&index), Err(Error::CircularReference(_))));
    }

    #[test]
    fn test_missing_pages_entry() {
        let data = doc("1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let index = ObjectIndex::build(&data).unwrap();
        assert!(matches!(page_refs(&index), Err(Error::InvalidPdf(_))));
    }
}
